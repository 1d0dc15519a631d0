//! Macros for implementing the assertion capabilities.
//!
//! - `is_zero_by_default!`: "zero" means "equals `Default::default()`"

/// Implement [`IsZero`](crate::IsZero) for types whose zero value is their
/// `Default`.
///
/// ```
/// #[derive(Default, PartialEq)]
/// struct Widget {
///     id: u32,
///     name: String,
/// }
///
/// stepwise::is_zero_by_default!(Widget);
///
/// use stepwise::IsZero;
/// assert!(Widget::default().is_zero());
/// ```
#[macro_export]
macro_rules! is_zero_by_default {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::IsZero for $ty {
                fn is_zero(&self) -> bool {
                    *self == <$ty as ::core::default::Default>::default()
                }
            }
        )*
    };
}
