//! Pairing resolver (spec §4.3): matches OCR'd pages across the old and new
//! drawing versions by extracted drawing name.
//!
//! A pure function — no repository or bus access — so it's trivial to test
//! for permutation-independence (P5): the same two page sets, fed in any
//! order, must produce the same matched pairs.

use std::collections::BTreeMap;

/// One OCR'd page, reduced to what the resolver needs.
#[derive(Debug, Clone)]
pub struct PageNameEntry {
    pub page_index: i32,
    pub drawing_name: Option<String>,
}

/// One matched pair of pages carrying the same drawing name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedPair {
    pub drawing_name: String,
    pub old_page_index: i32,
    pub new_page_index: i32,
}

#[derive(Debug, Clone, Default)]
pub struct PairingResult {
    /// Matched pairs, ordered by drawing name (deterministic regardless of
    /// input order).
    pub pairs: Vec<MatchedPair>,
    pub unmatched_old_names: Vec<String>,
    pub unmatched_new_names: Vec<String>,
}

/// Build a `drawing_name -> page_index` map, keeping the lowest page index
/// on a collision (two pages in the same version extracting the same
/// title-block text) and logging the dropped page.
fn name_map(pages: &[PageNameEntry]) -> BTreeMap<String, i32> {
    let mut map: BTreeMap<String, i32> = BTreeMap::new();
    for page in pages {
        let Some(name) = &page.drawing_name else { continue };
        match map.get(name) {
            Some(&existing) if existing <= page.page_index => {
                tracing::warn!(
                    drawing_name = %name,
                    kept_page_index = existing,
                    dropped_page_index = page.page_index,
                    "duplicate drawing name within one version; keeping the lower page index"
                );
            }
            Some(&existing) => {
                tracing::warn!(
                    drawing_name = %name,
                    kept_page_index = page.page_index,
                    dropped_page_index = existing,
                    "duplicate drawing name within one version; keeping the lower page index"
                );
                map.insert(name.clone(), page.page_index);
            }
            None => {
                map.insert(name.clone(), page.page_index);
            }
        }
    }
    map
}

/// Resolve matched pairs between two OCR'd page sets. Order-independent:
/// permuting either slice yields the same `pairs`, `unmatched_old_names`,
/// and `unmatched_new_names` (P5).
pub fn resolve_pairs(old_pages: &[PageNameEntry], new_pages: &[PageNameEntry]) -> PairingResult {
    let old_map = name_map(old_pages);
    let new_map = name_map(new_pages);

    let mut pairs = Vec::new();
    let mut unmatched_old_names = Vec::new();
    for (name, &old_index) in &old_map {
        match new_map.get(name) {
            Some(&new_index) => pairs.push(MatchedPair {
                drawing_name: name.clone(),
                old_page_index: old_index,
                new_page_index: new_index,
            }),
            None => unmatched_old_names.push(name.clone()),
        }
    }

    let unmatched_new_names = new_map
        .keys()
        .filter(|name| !old_map.contains_key(*name))
        .cloned()
        .collect();

    PairingResult {
        pairs,
        unmatched_old_names,
        unmatched_new_names,
    }
}
