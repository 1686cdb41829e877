#![forbid(unsafe_code)]

mod cursor;
mod frame;
mod meta;
mod pager;

pub use cursor::PageCursor;
pub use meta::{load_image, save_image, KeyFormat, KeyFormatKind, TreeMeta};
pub use pager::{PageWrite, Pager, PagerOptions, PagerStats, DEFAULT_PAGE_SIZE, MIN_PAGE_SIZE};
