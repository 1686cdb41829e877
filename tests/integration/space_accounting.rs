#![allow(missing_docs)]

use cowtree::{
    primitives::pager::{Pager, PagerOptions},
    storage::{
        btree::{CheckOptions, ConsistencyChecker, DefectKind, TreeBuilder, U64Layout},
        freelist::{free_page_capacity, FreeList},
    },
    types::{PageId, Result},
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn pager() -> Pager {
    Pager::new(PagerOptions {
        page_size: 256,
        initial_capacity: 256,
    })
    .expect("pager")
}

#[test]
fn shuffled_page_assignment_with_multi_page_free_list() -> Result<()> {
    let pager = pager();
    let layout = U64Layout::default();
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);

    for _ in 0..160 {
        pager.allocate_page();
    }
    let mut ids: Vec<PageId> = (0..160).map(PageId).collect();
    ids.shuffle(&mut rng);

    let keys: Vec<u64> = (1..=300).collect();
    let tree = TreeBuilder::new(&pager, &layout)?
        .leaf_fill(5)
        .internal_fill(4)
        .reuse_pages(ids.iter().copied())
        .build(&keys)?;
    let used = tree.pages().count();
    assert!(used < ids.len());

    let released = &ids[used..];
    assert!(released.len() > free_page_capacity(pager.page_size()));
    let mut free_list = FreeList::open(&pager, None);
    free_list.release(released)?;
    let free = free_list.ids()?;
    let last = pager.last_page_id().expect("pages");

    let mut checker = ConsistencyChecker::new(&pager, &layout, CheckOptions::default())?;
    assert!(checker.check(tree.root, tree.root_generation)?);
    assert!(checker.check_space(tree.root, last, free.iter().copied())?);
    assert_eq!(
        checker.stats().live_pages + checker.stats().free_ids,
        pager.page_count()
    );

    // Leaking one released id is named in the report.
    let leaked = released[released.len() / 2];
    let partial: Vec<PageId> = free.iter().copied().filter(|id| *id != leaked).collect();
    assert!(!checker.check_space(tree.root, last, partial)?);
    let defect = checker.defects().last().expect("unused pages defect");
    assert_eq!(defect.kind, DefectKind::UnusedPages);
    assert!(defect.message.starts_with("There are 1 unused pages in the store"));
    assert!(defect.message.ends_with(&format!("[{leaked}]")));
    Ok(())
}

#[test]
fn duplicate_leftmost_stops_the_level_walk() -> Result<()> {
    let pager = pager();
    let layout = U64Layout::default();
    let keys: Vec<u64> = (1..=30).collect();
    let tree = TreeBuilder::new(&pager, &layout)?
        .leaf_fill(3)
        .internal_fill(3)
        .build(&keys)?;
    let leftmost_leaf = tree.leaves()[0];

    let mut checker = ConsistencyChecker::new(&pager, &layout, CheckOptions::default())?;
    assert!(!checker.check_space(tree.root, tree.last_id, [leftmost_leaf])?);
    let defects = checker.defects();
    assert_eq!(defects[0].kind, DefectKind::DuplicatePageId);
    assert_eq!(defects[0].page, Some(leftmost_leaf));
    assert_eq!(defects[0].level, Some(tree.height() - 1));
    assert!(defects[0].message.contains("already seen"));
    let unused = defects.last().expect("unused pages defect");
    assert_eq!(unused.kind, DefectKind::UnusedPages);
    assert!(unused
        .message
        .starts_with(&format!("There are {} unused pages", tree.leaves().len() - 1)));
    Ok(())
}

#[test]
fn last_id_smaller_than_the_tree_is_reported() -> Result<()> {
    let pager = pager();
    let layout = U64Layout::default();
    let tree = TreeBuilder::new(&pager, &layout)?
        .leaf_fill(2)
        .build(&[1, 2, 3, 4, 5, 6])?;

    let mut checker = ConsistencyChecker::new(&pager, &layout, CheckOptions::default())?;
    assert!(!checker.check_space(tree.root, PageId(1), std::iter::empty())?);
    let beyond: Vec<_> = checker
        .defects()
        .iter()
        .filter(|d| d.kind == DefectKind::PageIdBeyondLast)
        .collect();
    assert!(!beyond.is_empty());
    assert!(beyond[0]
        .message
        .starts_with("Unexpectedly high id 3 seen when last id is 1"));
    Ok(())
}
