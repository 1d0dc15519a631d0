//! Scenario test set against an in-memory widget inventory.
//!
//! Run with: cargo run --example widgets -- --tag fast
//!
//! The `broken` scenario fails on purpose; filter it out with
//! `--tag fast` to see a clean run.

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use parking_lot::Mutex;
use stepwise::{be, Code, Context, RunnerArgs, Status, Stepper, TestSet};

// ============================================================================
// Subject under test
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Widget {
    sku: String,
    stock: u32,
}

#[derive(Clone, Default)]
struct Inventory {
    widgets: Arc<Mutex<HashMap<String, Widget>>>,
    offline: bool,
}

impl Inventory {
    async fn add(&self, sku: &str, stock: u32) -> Result<Widget, Status> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if self.offline {
            return Err(Status::new(Code::Unavailable, "inventory offline"));
        }
        let widget = Widget {
            sku: sku.to_string(),
            stock,
        };
        self.widgets.lock().insert(sku.to_string(), widget.clone());
        Ok(widget)
    }

    async fn take(&self, sku: &str, count: u32) -> Result<Widget, Status> {
        let mut widgets = self.widgets.lock();
        let widget = widgets
            .get_mut(sku)
            .ok_or_else(|| Status::new(Code::NotFound, format!("no widget {sku}")))?;
        if widget.stock < count {
            return Err(Status::new(Code::FailedPrecondition, "not enough stock")
                .with_detail("stock", widget.stock));
        }
        widget.stock -= count;
        Ok(widget.clone())
    }
}

// ============================================================================
// Scenarios
// ============================================================================

fn stock_scenario(inventory: Inventory) -> impl Fn(&mut Stepper) + Send + Sync + 'static {
    move |ss: &mut Stepper| {
        let inventory = inventory.clone();
        ss.setup({
            let inventory = inventory.clone();
            move |_ctx, _a| {
                let inventory = inventory.clone();
                async move {
                    inventory.widgets.lock().clear();
                    Ok(())
                }
            }
        });

        ss.step("add widget", {
            let inventory = inventory.clone();
            move |_ctx, a| {
                let inventory = inventory.clone();
                async move {
                    let added = inventory.add("sprocket", 5).await;
                    a.no_error(&added)?;
                    a.log("added five sprockets");
                    Ok(())
                }
            }
        });

        ss.step("take widgets", {
            let inventory = inventory.clone();
            move |_ctx, a| {
                let inventory = inventory.clone();
                async move {
                    let left = inventory.take("sprocket", 3).await;
                    a.no_error(&left)?;
                    let stock = left.map(|w| w.stock).unwrap_or_default();
                    a.that(be::equal(2, stock))?;

                    let too_many = inventory.take("sprocket", 3).await;
                    a.code_error(&too_many, Code::FailedPrecondition)
                }
            }
        });
    }
}

fn watched_scenario(inventory: Inventory) -> impl Fn(&mut Stepper) + Send + Sync + 'static {
    move |ss: &mut Stepper| {
        let inventory = inventory.clone();
        ss.background(|ctx: Context, a| async move {
            a.log("watching inventory");
            ctx.cancelled().await;
            Ok(())
        });

        for (name, stock) in [("small batch", 1_u32), ("large batch", 50)] {
            let inventory = inventory.clone();
            ss.variation(name, move |_ctx, a| {
                let inventory = inventory.clone();
                async move {
                    let added = inventory.add("gear", stock).await;
                    a.no_error(&added)
                }
            });
        }

        ss.step("take one gear", move |_ctx, a| {
            let inventory = inventory.clone();
            async move {
                let left = inventory.take("gear", 1).await;
                a.no_error(&left)?;
                let left = left.map(|w| w.stock).unwrap_or_default();
                a.that(be::less_than(left, 50))
            }
        });
    }
}

#[derive(Parser, Debug)]
#[command(about = "Widget inventory scenarios")]
struct Cli {
    #[command(flatten)]
    runner: RunnerArgs,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut set = TestSet::new();
    set.register(1.0, "stock levels", stock_scenario(Inventory::default()), &["fast", "env=dev"]);
    set.register(2.0, "watched batches", watched_scenario(Inventory::default()), &["fast"]);
    set.register(
        3.0,
        "offline inventory",
        stock_scenario(Inventory {
            offline: true,
            ..Inventory::default()
        }),
        &["broken"],
    );

    match set.run(&Context::background(), &cli.runner.tags).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
