//! Maps both a player id and a case-insensitive name to the same session
//! handle, and derives unique names on insertion.
//!
//! Session storage itself lives with the server (an arena/slab of
//! sessions); this index only ever stores the small handle used to look
//! a session back up, mirroring the player-id -> client-slot lookups
//! scattered through the original server's `sv_client` / `ge->edicts`
//! indexing.

use std::collections::HashMap;

#[derive(Debug)]
pub struct MultiKeyIndex<H: Copy + Eq> {
    by_player_id: HashMap<u32, H>,
    by_name_lower: HashMap<String, H>,
}

impl<H: Copy + Eq> Default for MultiKeyIndex<H> {
    fn default() -> Self {
        Self {
            by_player_id: HashMap::new(),
            by_name_lower: HashMap::new(),
        }
    }
}

impl<H: Copy + Eq> MultiKeyIndex<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_by_player_id(&self, player_id: u32) -> Option<H> {
        self.by_player_id.get(&player_id).copied()
    }

    pub fn get_by_name(&self, name: &str) -> Option<H> {
        self.by_name_lower.get(&name.to_lowercase()).copied()
    }

    /// Registers `handle` under `player_id` and `name` as given — caller
    /// must have already run the name through [`uniquify_name`].
    pub fn insert(&mut self, player_id: u32, name: &str, handle: H) {
        self.by_player_id.insert(player_id, handle);
        self.by_name_lower.insert(name.to_lowercase(), handle);
    }

    pub fn remove(&mut self, player_id: u32, name: &str) {
        self.by_player_id.remove(&player_id);
        self.by_name_lower.remove(&name.to_lowercase());
    }

    pub fn name_taken(&self, name: &str) -> bool {
        self.by_name_lower.contains_key(&name.to_lowercase())
    }
}

/// Resolves a name collision by appending the least integer suffix >= 1
/// that makes the name unique (case-insensitive). The vanilla default
/// name `Deuce` always gains the player-id as its suffix regardless of
/// whether it collides, per spec.
pub fn uniquify_name<H: Copy + Eq>(
    index: &MultiKeyIndex<H>,
    requested: &str,
    player_id: u32,
) -> String {
    if requested.eq_ignore_ascii_case("Deuce") {
        return format!("{}{}", requested, player_id);
    }
    if !index.name_taken(requested) {
        return requested.to_string();
    }
    let mut suffix = 1u32;
    loop {
        let candidate = format!("{}{}", requested, suffix);
        if !index.name_taken(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_name_passes_through_unchanged() {
        let idx: MultiKeyIndex<u32> = MultiKeyIndex::new();
        assert_eq!(uniquify_name(&idx, "Alpha", 5), "Alpha");
    }

    #[test]
    fn duplicate_name_gains_smallest_suffix() {
        let mut idx: MultiKeyIndex<u32> = MultiKeyIndex::new();
        idx.insert(1, "Alpha", 1);
        assert_eq!(uniquify_name(&idx, "Alpha", 9), "Alpha1");
        idx.insert(2, "Alpha1", 2);
        assert_eq!(uniquify_name(&idx, "Alpha", 9), "Alpha2");
    }

    #[test]
    fn name_matching_is_case_insensitive() {
        let mut idx: MultiKeyIndex<u32> = MultiKeyIndex::new();
        idx.insert(1, "Alpha", 1);
        assert!(idx.name_taken("ALPHA"));
        assert_eq!(uniquify_name(&idx, "alpha", 9), "alpha1");
    }

    #[test]
    fn vanilla_name_always_gets_player_id_suffix() {
        let idx: MultiKeyIndex<u32> = MultiKeyIndex::new();
        assert_eq!(uniquify_name(&idx, "Deuce", 7), "Deuce7");
        assert_eq!(uniquify_name(&idx, "deuce", 3), "deuce3");
    }
}
