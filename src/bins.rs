//! Cull Bins
//!
//! Named draw buckets a render state resolves to. The state cache only needs
//! to map a bin name to a stable index; ordering geometry inside a bin is the
//! cull system's business.

use parking_lot::RwLock;

/// How geometry inside a bin is ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinType {
    Unsorted,
    StateSorted,
    BackToFront,
    FrontToBack,
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinDefinition {
    pub name: String,
    pub bin_type: BinType,
    /// Bins draw in ascending `sort` order.
    pub sort: i32,
}

/// Registry of cull bins. Indices are stable for the manager's lifetime.
#[derive(Debug)]
pub struct CullBinManager {
    bins: RwLock<Vec<BinDefinition>>,
}

impl Default for CullBinManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CullBinManager {
    /// Creates a manager with the standard bins.
    #[must_use]
    pub fn new() -> Self {
        let manager = Self::empty();
        manager.add_bin("background", BinType::Fixed, 10);
        manager.add_bin("opaque", BinType::StateSorted, 20);
        manager.add_bin("transparent", BinType::BackToFront, 30);
        manager.add_bin("fixed", BinType::Fixed, 40);
        manager.add_bin("unsorted", BinType::Unsorted, 50);
        manager
    }

    /// Creates a manager without any bins.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            bins: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn find_bin(&self, name: &str) -> Option<usize> {
        self.bins.read().iter().position(|bin| bin.name == name)
    }

    /// Adds a bin and returns its index. Adding an existing name returns the
    /// existing bin untouched.
    pub fn add_bin(&self, name: &str, bin_type: BinType, sort: i32) -> usize {
        let mut bins = self.bins.write();
        if let Some(index) = bins.iter().position(|bin| bin.name == name) {
            return index;
        }
        bins.push(BinDefinition {
            name: name.to_owned(),
            bin_type,
            sort,
        });
        bins.len() - 1
    }

    #[must_use]
    pub fn num_bins(&self) -> usize {
        self.bins.read().len()
    }

    #[must_use]
    pub fn bin(&self, index: usize) -> Option<BinDefinition> {
        self.bins.read().get(index).cloned()
    }

    /// Bin indices in draw order.
    #[must_use]
    pub fn sorted_bins(&self) -> Vec<usize> {
        let bins = self.bins.read();
        let mut order: Vec<usize> = (0..bins.len()).collect();
        order.sort_by_key(|&i| (bins[i].sort, i));
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bins() {
        let manager = CullBinManager::new();
        assert_eq!(manager.num_bins(), 5);
        let opaque = manager.find_bin("opaque").unwrap();
        assert_eq!(manager.bin(opaque).unwrap().bin_type, BinType::StateSorted);
        assert!(manager.find_bin("missing").is_none());
    }

    #[test]
    fn test_add_bin_is_idempotent() {
        let manager = CullBinManager::empty();
        let a = manager.add_bin("decals", BinType::Fixed, 5);
        let b = manager.add_bin("decals", BinType::Unsorted, 99);
        assert_eq!(a, b);
        assert_eq!(manager.bin(a).unwrap().sort, 5);
    }

    #[test]
    fn test_sorted_bins() {
        let manager = CullBinManager::empty();
        let late = manager.add_bin("late", BinType::Unsorted, 100);
        let early = manager.add_bin("early", BinType::Unsorted, -5);
        assert_eq!(manager.sorted_bins(), vec![early, late]);
    }
}
