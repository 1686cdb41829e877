#![allow(missing_docs)]

use cowtree::{
    admin::{self, verify_pager, AdminOpenOptions, VerifyLevel},
    primitives::pager::{load_image, save_image, Pager, PagerOptions, TreeMeta},
    storage::btree::{
        gspp::{write_pointer, write_slot, Slot, SlotId},
        page::{self, NodeShape, PointerField},
        BuiltTree, CheckOptions, ConsistencyChecker, DefectKind, Layout, NodeKind, TreeBuilder,
        U64Layout,
    },
    types::{Generation, PageId, Result},
};
use tempfile::TempDir;

fn pager(page_size: u32) -> Pager {
    Pager::new(PagerOptions {
        page_size,
        initial_capacity: 64,
    })
    .expect("pager")
}

fn meta_for(tree: &BuiltTree, layout: &U64Layout) -> TreeMeta {
    TreeMeta {
        root: tree.root,
        root_generation: tree.root_generation,
        stable_generation: tree.root_generation,
        unstable_generation: tree.root_generation.next(),
        free_list_head: None,
        key_format: layout.key_format(),
    }
}

#[test]
fn saved_image_checks_clean_after_reload() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("tree.img");
    let layout = U64Layout::default();
    let source = pager(512);
    let keys: Vec<u64> = (0..500).map(|k| k * 3 + 1).collect();
    let tree = TreeBuilder::new(&source, &layout)?
        .leaf_fill(7)
        .internal_fill(4)
        .build(&keys)?;
    save_image(&source, &meta_for(&tree, &layout), &path)?;

    let (loaded, meta) = load_image(&path)?;
    let mut checker = ConsistencyChecker::new(
        &loaded,
        &layout,
        CheckOptions::for_stable(meta.stable_generation),
    )?;
    assert!(checker.check(meta.root, meta.root_generation)?);
    assert!(checker.check_space(meta.root, tree.last_id, std::iter::empty())?);
    assert_eq!(checker.stats().leaves, 72);
    assert_eq!(checker.stats().live_pages, loaded.page_count());
    Ok(())
}

#[test]
fn newer_generation_tree_checks_against_its_own_boundary() -> Result<()> {
    let layout = U64Layout::default();
    let pager = pager(256);
    let tree = TreeBuilder::new(&pager, &layout)?
        .generation(Generation(9))
        .leaf_fill(3)
        .build(&(1..=40).collect::<Vec<u64>>())?;

    let mut current = ConsistencyChecker::new(&pager, &layout, CheckOptions::for_stable(Generation(9)))?;
    assert!(current.check(tree.root, Generation(9))?);

    // A reader whose stable boundary predates the build sees every written
    // slot as a crash leftover, so the root appears to have no children.
    let mut stale = ConsistencyChecker::new(&pager, &layout, CheckOptions::for_stable(Generation(3)))?;
    assert!(!stale.check(tree.root, Generation(9))?);
    assert_eq!(stale.defects().len(), 3);
    assert!(stale
        .defects()
        .iter()
        .all(|d| d.kind == DefectKind::MissingChild && d.page == Some(tree.root)));
    assert_eq!(stale.stats().leaves, 0);
    Ok(())
}

#[test]
fn copy_on_write_replacement_is_followed_through_the_heir() -> admin::Result<()> {
    let layout = U64Layout::default();
    let pager = pager(256);
    let keys: Vec<u64> = (1..=12).map(|k| k * 10).collect();
    let tree = TreeBuilder::new(&pager, &layout)?
        .leaf_fill(2)
        .internal_fill(2)
        .build(&keys)?;
    let shape = NodeShape::new(pager.page_size(), 8, 8)?;

    // A writer in generation 2 copied leaf 3 and is about to swing the parent.
    let old = tree.leaves()[3];
    let copy = pager.allocate_page();
    let writer = TreeBuilder::new(&pager, &layout)?.generation(Generation(2));
    writer.write_node(
        copy,
        NodeKind::Leaf,
        &[70, 80],
        &[],
        Some(tree.leaves()[2]),
        Some(tree.leaves()[4]),
    )?;
    {
        let mut write = pager.write(old)?;
        write_pointer(
            &mut write,
            PointerField::Heir.offset(&shape),
            Some(copy),
            Generation(1),
            Generation(2),
        )?;
    }

    let mut checker = ConsistencyChecker::new(&pager, &layout, CheckOptions::default())?;
    assert!(checker.check(tree.root, tree.root_generation)?, "{:?}", checker.defects());
    assert_eq!(checker.stats().heirs_followed, 1);

    let meta = meta_for(&tree, &layout);
    let report = verify_pager(&pager, &meta, &AdminOpenOptions::default(), VerifyLevel::Full)?;
    // The copy is not reachable from the old root yet.
    assert!(!report.success);
    assert_eq!(report.findings[0].kind, Some(DefectKind::UnusedPages));
    assert!(report.findings.iter().any(|f| f.message.contains("heir")));
    Ok(())
}

#[test]
fn one_checker_accumulates_across_roots() -> Result<()> {
    let layout = U64Layout::default();
    let pager = pager(256);
    let first = TreeBuilder::new(&pager, &layout)?.build(&[1, 2, 3])?;
    let second = TreeBuilder::new(&pager, &layout)?
        .leaf_fill(2)
        .build(&[4, 5, 6, 7, 8])?;
    let shape = NodeShape::new(pager.page_size(), 8, 8)?;
    {
        let mut write = pager.write(second.leaves()[1])?;
        page::put_key(&mut write, &shape, 1, &1u64.to_be_bytes())?;
    }

    let mut checker = ConsistencyChecker::new(&pager, &layout, CheckOptions::default())?;
    assert!(checker.check(first.root, Generation::MIN)?);
    assert!(!checker.check(second.root, Generation::MIN)?);
    assert!(checker.check(first.root, Generation::MIN)?);
    let kinds: Vec<DefectKind> = checker.defects().iter().map(|d| d.kind).collect();
    assert_eq!(kinds, vec![DefectKind::KeyOutOfRange, DefectKind::KeyOrder]);
    assert_eq!(checker.take_defects().len(), 2);
    assert!(checker.defects().is_empty());
    Ok(())
}

#[test]
fn conflicting_stable_slots_are_ambiguous() -> Result<()> {
    let layout = U64Layout::default();
    let pager = pager(256);
    let tree = TreeBuilder::new(&pager, &layout)?
        .leaf_fill(2)
        .build(&[1, 2, 3, 4])?;
    let shape = NodeShape::new(pager.page_size(), 8, 8)?;
    let offset = PointerField::LeftSibling.offset(&shape);
    {
        let mut write = pager.write(tree.leaves()[1])?;
        write_slot(&mut write, offset, SlotId::A, &Slot::new(Generation(1), Some(tree.leaves()[0]))?)?;
        write_slot(&mut write, offset, SlotId::B, &Slot::new(Generation(1), Some(PageId(40)))?)?;
    }

    let mut checker = ConsistencyChecker::new(&pager, &layout, CheckOptions::default())?;
    assert!(!checker.check(tree.root, Generation::MIN)?);
    assert_eq!(checker.defects().len(), 1);
    assert_eq!(checker.defects()[0].kind, DefectKind::AmbiguousPointer);
    assert_eq!(checker.defects()[0].page, Some(tree.leaves()[1]));
    Ok(())
}
