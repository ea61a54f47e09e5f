/// Perform a const assertion.
macro_rules! const_assert {
    ($($tt:tt)*) => {
        const _: () = assert!($($tt)*);
    }
}

/// Storage blocks and storage units.
pub mod block;
/// Descriptors (inodes) and their contents.
pub mod descriptor;
/// Validated directory entry names.
pub mod name;
