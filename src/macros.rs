pub use enclose::*;

/// Builds a [`ComputedSignal`](crate::ComputedSignal), cloning the listed
/// handles into the formula.
///
/// ```
/// use transient::{computed, WritableSignal};
///
/// let a = WritableSignal::new(2);
/// let b = WritableSignal::new(3);
/// let product = computed!((a, b) => Ok(a.get()? * b.get()?));
///
/// assert_eq!(product.get().unwrap(), 6);
/// ```
#[macro_export]
macro_rules! computed {
    (( $($d_tt:tt)* ) => $($b:tt)*) => {
        $crate::ComputedSignal::new($crate::macros::enclose!(($( $d_tt )*) move || { $($b)* }))
    };
    (=> $($b:tt)*) => {
        $crate::ComputedSignal::new(move || { $($b)* })
    };
}

/// Builds an [`Effect`](crate::Effect), cloning the listed handles into
/// its body.
#[macro_export]
macro_rules! effect {
    (( $($d_tt:tt)* ) => $($b:tt)*) => {
        $crate::Effect::new($crate::macros::enclose!(($( $d_tt )*) move || { $($b)* }))
    };
    (=> $($b:tt)*) => {
        $crate::Effect::new(move || { $($b)* })
    };
}
