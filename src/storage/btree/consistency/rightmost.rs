use super::{Defect, DefectKind};
use crate::storage::btree::gspp::Pointer;
use crate::types::{Generation, PageId};

#[derive(Clone, Copy, Debug)]
struct ChainLink {
    page: PageId,
    generation: Generation,
    right: Pointer,
}

/// Sibling chain state for one level, fed left to right.
#[derive(Debug, Default)]
pub(super) struct RightmostInChain {
    current: Option<ChainLink>,
}

impl RightmostInChain {
    /// Accepts the next node of the level.
    ///
    /// Pointers already reported as corrupt are skipped.
    pub(super) fn assert_next(
        &mut self,
        page: PageId,
        generation: Generation,
        left: &Pointer,
        right: &Pointer,
        level: usize,
        defects: &mut Vec<Defect>,
    ) {
        match self.current {
            None => {
                if let Pointer::Node { page: sibling, .. } = left {
                    defects.push(Defect::on_page(
                        DefectKind::SiblingMismatch,
                        page,
                        level,
                        format!(
                            "leftmost node {page} on level {level} has left sibling {sibling}"
                        ),
                    ));
                }
            }
            Some(prev) => {
                match prev.right {
                    Pointer::Node {
                        page: named,
                        generation: promised,
                    } => {
                        if named != page {
                            defects.push(Defect::on_page(
                                DefectKind::SiblingMismatch,
                                prev.page,
                                level,
                                format!(
                                    "right sibling of {} is {named} but the next node on level {level} is {page}",
                                    prev.page
                                ),
                            ));
                        } else if promised < generation {
                            defects.push(Defect::on_page(
                                DefectKind::GenerationOrder,
                                prev.page,
                                level,
                                format!(
                                    "right sibling pointer of {} promises gen:{promised} but {page} has gen:{generation}",
                                    prev.page
                                ),
                            ));
                        }
                    }
                    Pointer::NoNode => defects.push(Defect::on_page(
                        DefectKind::SiblingMismatch,
                        prev.page,
                        level,
                        format!(
                            "node {} has no right sibling but {page} follows it on level {level}",
                            prev.page
                        ),
                    )),
                    Pointer::Corrupt(_) => {}
                }
                match *left {
                    Pointer::Node {
                        page: named,
                        generation: promised,
                    } => {
                        if named != prev.page {
                            defects.push(Defect::on_page(
                                DefectKind::SiblingMismatch,
                                page,
                                level,
                                format!(
                                    "left sibling of {page} is {named} but the previous node on level {level} is {}",
                                    prev.page
                                ),
                            ));
                        } else if promised < prev.generation {
                            defects.push(Defect::on_page(
                                DefectKind::GenerationOrder,
                                page,
                                level,
                                format!(
                                    "left sibling pointer of {page} promises gen:{promised} but {} has gen:{}",
                                    prev.page, prev.generation
                                ),
                            ));
                        }
                    }
                    Pointer::NoNode => defects.push(Defect::on_page(
                        DefectKind::SiblingMismatch,
                        page,
                        level,
                        format!(
                            "node {page} has no left sibling but follows {} on level {level}",
                            prev.page
                        ),
                    )),
                    Pointer::Corrupt(_) => {}
                }
            }
        }
        self.current = Some(ChainLink {
            page,
            generation,
            right: *right,
        });
    }

    /// Requires the last node seen to end the chain.
    pub(super) fn assert_last(&self, level: usize, defects: &mut Vec<Defect>) {
        if let Some(ChainLink {
            page,
            right: Pointer::Node { page: sibling, .. },
            ..
        }) = self.current
        {
            defects.push(Defect::on_page(
                DefectKind::UnterminatedChain,
                page,
                level,
                format!(
                    "rightmost node {page} on level {level} still has right sibling {sibling}"
                ),
            ));
        }
    }
}
