use std::path::Path;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::info;

use crate::primitives::pager::{save_image, KeyFormatKind, Pager, TreeMeta};
use crate::storage::btree::gspp::{write_slot, Slot, SlotId};
use crate::storage::btree::page::{self, PointerField};
use crate::storage::btree::{BuiltTree, BytesLayout, Layout, TreeBuilder, U64Layout};
use crate::storage::freelist::FreeList;
use crate::types::{Generation, PageId};

use crate::admin::error::{AdminError, Result};
use crate::admin::options::AdminOpenOptions;
use crate::admin::util::ensure_parent_dir;

const DEMO_VALUE_SIZE: usize = 8;

/// Damage deliberately written into a demo image.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemoCorruption {
    /// Leave the tree intact.
    #[default]
    None,
    /// Swap the first two keys of the leftmost leaf.
    MisorderedKeys,
    /// Allocate a page that is neither in the tree nor free.
    UnusedPage,
    /// Break both slots of the leftmost leaf's right-sibling pointer.
    BrokenSibling,
}

/// Shape of the demo tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoOptions {
    /// Number of keys; keys are `10, 20, ...`.
    pub keys: u64,
    /// Keys per leaf.
    pub leaf_fill: usize,
    /// Children per internal node.
    pub internal_fill: usize,
    /// Pages released to the free list after the build.
    pub free_pages: usize,
    /// Key encoding written to the pages.
    pub key_format: KeyFormatKind,
    /// Damage to apply.
    pub corruption: DemoCorruption,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            keys: 1000,
            leaf_fill: 16,
            internal_fill: 8,
            free_pages: 4,
            key_format: KeyFormatKind::U64,
            corruption: DemoCorruption::None,
        }
    }
}

/// Summary of a written demo image.
#[derive(Clone, Debug, Serialize)]
pub struct DemoReport {
    /// Image location.
    pub path: String,
    /// Pages in the image.
    pub pages: u64,
    /// Root page.
    pub root: PageId,
    /// Tree levels.
    pub height: usize,
    /// Leaf pages.
    pub leaves: usize,
    /// Ids recorded by the free list, its own pages included.
    pub free_ids: usize,
    /// Damage applied.
    pub corruption: DemoCorruption,
}

/// Builds a sample tree and saves it as a page image at `path`.
///
/// # Errors
///
/// Fails if the tree does not fit the requested shape, the corruption cannot
/// be applied to it, or the image cannot be written.
pub fn write_demo_image(
    path: impl AsRef<Path>,
    opts: &AdminOpenOptions,
    demo: &DemoOptions,
) -> Result<DemoReport> {
    let path = path.as_ref();
    let pager = Pager::new(opts.pager.clone())?;
    let (tree, key_format) = match demo.key_format {
        KeyFormatKind::U64 => {
            let layout = U64Layout::new(DEMO_VALUE_SIZE);
            let keys: Vec<u64> = (1..=demo.keys).map(|k| k * 10).collect();
            (build(&pager, &layout, &keys, demo)?, layout.key_format())
        }
        KeyFormatKind::Bytes => {
            let layout = BytesLayout::new(8, DEMO_VALUE_SIZE)?;
            let keys: Vec<SmallVec<[u8; 16]>> = (1..=demo.keys)
                .map(|k| SmallVec::from_slice(&(k * 10).to_be_bytes()))
                .collect();
            (build(&pager, &layout, &keys, demo)?, layout.key_format())
        }
    };

    let released: Vec<PageId> = (0..demo.free_pages).map(|_| pager.allocate_page()).collect();
    let mut free_list = FreeList::open(&pager, None);
    free_list.release(&released)?;
    let free_ids = free_list.ids()?.len();

    match demo.corruption {
        DemoCorruption::UnusedPage => {
            pager.allocate_page();
        }
        DemoCorruption::BrokenSibling => {
            let Some((&first, &second)) = tree.leaves().first().zip(tree.leaves().get(1)) else {
                return Err(AdminError::Message(
                    "broken-sibling demo needs at least two leaves".into(),
                ));
            };
            let mut slot = Slot::new(tree.root_generation, Some(second))?;
            slot.checksum ^= 0xFFFF;
            let offset = PointerField::RightSibling.offset(&page::NodeShape::new(
                pager.page_size(),
                key_format.key_size as usize,
                key_format.value_size as usize,
            )?);
            let mut write = pager.write(first)?;
            write_slot(&mut write, offset, SlotId::A, &slot)?;
            write_slot(&mut write, offset, SlotId::B, &slot)?;
        }
        DemoCorruption::None | DemoCorruption::MisorderedKeys => {}
    }

    let meta = TreeMeta {
        root: tree.root,
        root_generation: tree.root_generation,
        stable_generation: tree.root_generation,
        unstable_generation: tree.root_generation.next(),
        free_list_head: free_list.head(),
        key_format,
    };
    ensure_parent_dir(path)?;
    save_image(&pager, &meta, path)?;
    info!(
        path = %path.display(),
        pages = pager.page_count(),
        corruption = ?demo.corruption,
        "demo image written"
    );
    Ok(DemoReport {
        path: path.display().to_string(),
        pages: pager.page_count(),
        root: tree.root,
        height: tree.height(),
        leaves: tree.leaves().len(),
        free_ids,
        corruption: demo.corruption,
    })
}

fn build<L: Layout>(
    pager: &Pager,
    layout: &L,
    keys: &[L::Key],
    demo: &DemoOptions,
) -> Result<BuiltTree> {
    let builder = TreeBuilder::new(pager, layout)?
        .generation(Generation::MIN)
        .leaf_fill(demo.leaf_fill)
        .internal_fill(demo.internal_fill);
    let shape = builder.shape();
    let tree = builder.build(keys)?;
    if demo.corruption == DemoCorruption::MisorderedKeys {
        let (Some(first), Some(second)) = (keys.first(), keys.get(1)) else {
            return Err(AdminError::Message(
                "misordered-keys demo needs at least two keys".into(),
            ));
        };
        let Some(&leaf) = tree.leaves().first() else {
            return Err(AdminError::Message("demo tree has no leaves".into()));
        };
        if demo.leaf_fill < 2 {
            return Err(AdminError::Message(
                "misordered-keys demo needs two keys per leaf".into(),
            ));
        }
        let mut encoded = vec![0u8; shape.key_size()];
        let mut write = pager.write(leaf)?;
        layout.write_key(second, &mut encoded);
        page::put_key(&mut write, &shape, 0, &encoded)?;
        layout.write_key(first, &mut encoded);
        page::put_key(&mut write, &shape, 1, &encoded)?;
    }
    Ok(tree)
}
