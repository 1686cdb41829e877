#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Barrier;
use std::thread;

use cowtree::{
    primitives::pager::{Pager, PagerOptions},
    storage::btree::{
        page::{self, NodeShape, PointerField},
        BuiltTree, CheckOptions, ConsistencyChecker, TreeBuilder, U64Layout,
    },
    types::{Generation, PageId, Result},
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const READERS: usize = 4;
const CHECKS_PER_READER: usize = 40;

fn build(pager: &Pager, layout: &U64Layout) -> BuiltTree {
    let keys: Vec<u64> = (1..=400).map(|k| k * 2).collect();
    TreeBuilder::new(pager, layout)
        .expect("builder")
        .leaf_fill(6)
        .internal_fill(3)
        .build(&keys)
        .expect("build")
}

/// Scrambles a page and puts the original bytes back inside one write guard.
fn scramble_and_restore(pager: &Pager, shape: &NodeShape, page: PageId) -> Result<()> {
    let original = pager.read_page(page)?;
    let mut write = pager.write(page)?;
    page::set_key_count(&mut write, 9_999)?;
    page::set_generation(&mut write, Generation(77))?;
    page::put_key(&mut write, shape, 0, &u64::MAX.to_be_bytes())?;
    write.put_bytes(PointerField::RightSibling.offset(shape), &[0xAB; 24])?;
    write.put_bytes(0, &original)
}

#[test]
fn readers_never_observe_in_flight_writes() -> Result<()> {
    let pager = Pager::new(PagerOptions {
        page_size: 256,
        initial_capacity: 256,
    })?;
    let layout = U64Layout::default();
    let tree = build(&pager, &layout);
    let shape = NodeShape::new(pager.page_size(), 8, 8)?;
    let pages: Vec<PageId> = tree.pages().collect();
    let done = AtomicBool::new(false);
    let start = Barrier::new(READERS + 1);

    let outcomes = thread::scope(|scope| {
        let writer = scope.spawn(|| -> Result<u64> {
            let mut rng = ChaCha8Rng::seed_from_u64(7);
            start.wait();
            let mut writes = 0u64;
            while !done.load(Ordering::Acquire) {
                let page = pages[rng.gen_range(0..pages.len())];
                scramble_and_restore(&pager, &shape, page)?;
                writes += 1;
            }
            Ok(writes)
        });

        let readers: Vec<_> = (0..READERS)
            .map(|_| {
                scope.spawn(|| -> Result<(usize, u64)> {
                    start.wait();
                    let mut checker =
                        ConsistencyChecker::new(&pager, &layout, CheckOptions::default())?;
                    let mut clean = 0;
                    for _ in 0..CHECKS_PER_READER {
                        let tree_ok = checker.check(tree.root, tree.root_generation)?;
                        let space_ok =
                            checker.check_space(tree.root, tree.last_id, std::iter::empty())?;
                        if tree_ok && space_ok {
                            clean += 1;
                        }
                    }
                    assert!(checker.defects().is_empty(), "{:?}", checker.defects());
                    Ok((clean, checker.stats().retries))
                })
            })
            .collect();

        let joined: Vec<_> = readers.into_iter().map(|handle| handle.join()).collect();
        // Stop the writer before any reader panic is resumed.
        done.store(true, Ordering::Release);
        let writes = writer.join().expect("writer thread");
        let results: Vec<Result<(usize, u64)>> = joined
            .into_iter()
            .map(|joined| joined.expect("reader thread"))
            .collect();
        (results, writes)
    });

    let (results, writes) = outcomes;
    assert!(writes? > 0);
    for result in results {
        let (clean, _retries) = result?;
        assert_eq!(clean, CHECKS_PER_READER);
    }
    Ok(())
}

#[test]
fn checker_waits_out_a_held_write_guard() -> Result<()> {
    let pager = Pager::new(PagerOptions {
        page_size: 256,
        initial_capacity: 64,
    })?;
    let layout = U64Layout::default();
    let tree = build(&pager, &layout);
    let victim = tree.leaves()[5];
    let held = Barrier::new(2);

    thread::scope(|scope| -> Result<()> {
        let writer = scope.spawn(|| -> Result<()> {
            let original = pager.read_page(victim)?;
            let mut write = pager.write(victim)?;
            page::set_key_count(&mut write, 9_999)?;
            held.wait();
            thread::sleep(std::time::Duration::from_millis(50));
            write.put_bytes(0, &original)?;
            Ok(())
        });
        held.wait();
        let mut checker = ConsistencyChecker::new(&pager, &layout, CheckOptions::default())?;
        assert!(checker.check(tree.root, tree.root_generation)?);
        writer.join().expect("writer thread")
    })
}
