//! Catching panics from step callbacks.
//!
//! A panic inside a step is an unexpected fault, not an assertion: it is
//! caught, its stack trace captured and filtered, and the step fails like
//! any other. The process-wide panic hook is chained once; it only captures
//! (and stays quiet) while a [`catch`] future is being polled on the current
//! thread, and defers to the previous hook everywhere else.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::{self as std_panic, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context as TaskContext, Poll};

use futures::future::BoxFuture;

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static LAST_STACK: RefCell<Option<String>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

/// A caught panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Panicked {
    /// The panic payload, if it was a string.
    pub message: String,
    /// Stack trace with the panic machinery frames stripped.
    pub stack: Vec<String>,
}

fn install_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = std_panic::take_hook();
        std_panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) {
                let stack = Backtrace::force_capture().to_string();
                LAST_STACK.with(|last| *last.borrow_mut() = Some(stack));
            } else {
                previous(info);
            }
        }));
    });
}

/// Poll `fut`, converting a panic into `Err(Panicked)`.
pub fn catch<T>(fut: BoxFuture<'_, T>) -> CatchPanic<'_, T> {
    install_hook();
    CatchPanic { inner: fut }
}

/// Future returned by [`catch`].
pub struct CatchPanic<'a, T> {
    inner: BoxFuture<'a, T>,
}

impl<T> Future for CatchPanic<'_, T> {
    type Output = Result<T, Panicked>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let was_capturing = CAPTURING.with(|capturing| capturing.replace(true));
        let polled = std_panic::catch_unwind(AssertUnwindSafe(|| self.inner.as_mut().poll(cx)));
        CAPTURING.with(|capturing| capturing.set(was_capturing));

        match polled {
            Ok(poll) => poll.map(Ok),
            Err(payload) => {
                let raw = LAST_STACK.with(|last| last.borrow_mut().take());
                Poll::Ready(Err(Panicked {
                    message: panic_message(payload),
                    stack: raw.as_deref().map(filter_stack).unwrap_or_default(),
                }))
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic payload".to_string()
    }
}

fn is_frame_header(line: &str) -> bool {
    match line.trim_start().split_once(':') {
        Some((index, _)) => !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

fn is_panic_machinery(header: &str) -> bool {
    ["panicking::", "rust_begin_unwind", "begin_panic", "__rust_end_short_backtrace"]
        .iter()
        .any(|marker| header.contains(marker))
}

/// Strip the frames above and including the panic machinery from a
/// rendered backtrace, so the trace starts at the code that panicked.
///
/// Frames before the first machinery frame (the capture itself) go too.
/// A trace without machinery frames is returned whole.
pub fn filter_stack(raw: &str) -> Vec<String> {
    let lines: Vec<&str> = raw.lines().collect();

    let mut cut = None;
    for (idx, line) in lines.iter().enumerate() {
        if !is_frame_header(line) {
            continue;
        }
        if is_panic_machinery(line) {
            cut = Some(idx);
        } else if cut.is_some() {
            return lines[idx..].iter().map(|l| l.to_string()).collect();
        }
    }

    match cut {
        Some(_) => Vec::new(),
        None => lines.iter().map(|l| l.to_string()).collect(),
    }
}
