//! Angle-sorted table of catalog star pairs.

/// Two catalog stars (indices into the owning [`super::CatalogIndex`]) and their separation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StarPair {
    pub a: usize,
    pub b: usize,
    /// Angular separation (radians).
    pub angle: f64,
}

/// Pairs sorted by angle so a separation band is one contiguous slice.
#[derive(Clone, Debug, Default)]
pub struct PairIndex {
    pairs: Vec<StarPair>,
}

impl PairIndex {
    pub fn new(mut pairs: Vec<StarPair>) -> Self {
        pairs.sort_by(|p, q| {
            p.angle
                .total_cmp(&q.angle)
                .then(p.a.cmp(&q.a))
                .then(p.b.cmp(&q.b))
        });
        PairIndex { pairs }
    }

    /// Pairs with `lo <= angle <= hi`.
    pub fn in_range(&self, lo: f64, hi: f64) -> &[StarPair] {
        let start = self.pairs.partition_point(|p| p.angle < lo);
        let end = self.pairs.partition_point(|p| p.angle <= hi);
        &self.pairs[start..end.max(start)]
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[StarPair] {
        &self.pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(a: usize, b: usize, angle: f64) -> StarPair {
        StarPair { a, b, angle }
    }

    #[test]
    fn test_range_query() {
        let index = PairIndex::new(vec![
            pair(0, 1, 0.30),
            pair(0, 2, 0.10),
            pair(1, 2, 0.20),
            pair(2, 3, 0.25),
        ]);
        let hits: Vec<_> = index.in_range(0.15, 0.25).iter().map(|p| (p.a, p.b)).collect();
        assert_eq!(hits, vec![(1, 2), (2, 3)]);
        assert!(index.in_range(0.31, 0.5).is_empty());
        assert!(index.in_range(0.2, 0.1).is_empty());
        assert_eq!(index.in_range(0.0, 1.0).len(), 4);
    }
}
