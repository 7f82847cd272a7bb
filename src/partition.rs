use std::ops::Range;

/// A contiguous sub-range `[start, end)` of a job's domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Partition {
  /// Position of this partition within its job, starting at 0.
  pub index: usize,
  pub start: u64,
  pub end: u64,
}

impl Partition {
  pub fn new(index: usize, range: Range<u64>) -> Self {
    Self {
      index,
      start: range.start,
      end: range.end.max(range.start),
    }
  }

  /// Splits `domain` into at most `parts` contiguous, non-overlapping
  /// partitions that exactly cover it. Every partition gets `len / parts`
  /// values and the last one also absorbs the remainder. Never yields an
  /// empty partition; an empty domain yields none.
  pub fn split(domain: Range<u64>, parts: usize) -> Vec<Partition> {
    let len = domain.end.saturating_sub(domain.start);
    if len == 0 {
      return Vec::new();
    }
    let parts = (parts.max(1) as u64).min(len);
    let per_part = len / parts;

    (0..parts)
      .map(|i| {
        let start = domain.start + per_part * i;
        let end = if i + 1 == parts { domain.end } else { start + per_part };
        Partition::new(i as usize, start..end)
      })
      .collect()
  }

  pub fn range(&self) -> Range<u64> {
    self.start..self.end
  }

  pub fn len(&self) -> u64 {
    self.end - self.start
  }

  pub fn is_empty(&self) -> bool {
    self.start == self.end
  }

  pub fn contains(&self, value: u64) -> bool {
    self.range().contains(&value)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn assert_exact_cover(partitions: &[Partition], domain: Range<u64>) {
    let mut expected_start = domain.start;
    for (i, p) in partitions.iter().enumerate() {
      assert_eq!(p.index, i);
      assert_eq!(p.start, expected_start, "gap or overlap before partition {}", i);
      assert!(!p.is_empty());
      expected_start = p.end;
    }
    assert_eq!(expected_start, domain.end);
  }

  #[test]
  fn test_split_last_partition_absorbs_remainder() {
    let partitions = Partition::split(3..100, 4);
    assert_eq!(partitions.len(), 4);
    assert_exact_cover(&partitions, 3..100);
    // 97 values: 24 per part, the last gets 25.
    assert_eq!(partitions[0].range(), 3..27);
    assert_eq!(partitions[3].range(), 75..100);
    assert_eq!(partitions[3].len(), 25);
  }

  #[test]
  fn test_split_never_yields_empty_partitions() {
    let partitions = Partition::split(10..13, 8);
    assert_eq!(partitions.len(), 3);
    assert_exact_cover(&partitions, 10..13);

    assert!(Partition::split(5..5, 4).is_empty());
    assert_eq!(Partition::split(0..9, 0).len(), 1);
  }

  #[test]
  fn test_split_covers_many_shapes() {
    for len in [1u64, 2, 7, 64, 1000, 1001] {
      for parts in [1usize, 2, 3, 5, 16] {
        let domain = 17..17 + len;
        assert_exact_cover(&Partition::split(domain.clone(), parts), domain);
      }
    }
  }
}
