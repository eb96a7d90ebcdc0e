/*!
Pagination arithmetic shared by every list view.

All lists page with the same fixed size; the client supplies a 1-based
page number and gets back at most `PAGE_SIZE` rows plus the total match
count, from which the page-count footer is computed.
*/

/// Fixed page size shared by all list views.
pub const PAGE_SIZE: u32 = 6;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pagination {
    page: u32,
}

impl Pagination {
    /// A page number below 1 is clamped to 1.
    pub fn new(page: u32) -> Self {
        Self { page: page.max(1) }
    }

    pub fn page(&self) -> u32 { self.page }

    /// Row offset of the first row of this page.
    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * PAGE_SIZE as i64
    }

    pub fn limit(&self) -> i64 { PAGE_SIZE as i64 }
}

impl Default for Pagination {
    fn default() -> Self { Self { page: 1 } }
}

/// `ceil(total / PAGE_SIZE)`: the number of non-empty pages.
pub fn n_pages(total: i64) -> i64 {
    (total + PAGE_SIZE as i64 - 1) / PAGE_SIZE as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets() {
        assert_eq!(Pagination::new(1).offset(), 0);
        assert_eq!(Pagination::new(2).offset(), 6);
        assert_eq!(Pagination::new(5).offset(), 24);
        // Page numbers below 1 clamp rather than going negative.
        assert_eq!(Pagination::new(0).offset(), 0);
        assert_eq!(Pagination::default(), Pagination::new(1));
    }

    #[test]
    fn page_counts() {
        assert_eq!(n_pages(0), 0);
        assert_eq!(n_pages(1), 1);
        assert_eq!(n_pages(6), 1);
        assert_eq!(n_pages(7), 2);
        assert_eq!(n_pages(12), 2);
        assert_eq!(n_pages(13), 3);
    }

    /// Paging through an ordered set with these offsets/limits must
    /// reproduce the whole set exactly, with the last non-empty page at
    /// `n_pages` and an empty page just past it.
    #[test]
    fn pages_partition_the_set() {
        for total in [0usize, 1, 5, 6, 7, 11, 12, 13, 25] {
            let all: Vec<usize> = (0..total).collect();

            let mut seen: Vec<usize> = Vec::new();
            let mut page = 1u32;
            loop {
                let p = Pagination::new(page);
                let start = (p.offset() as usize).min(all.len());
                let end = (start + p.limit() as usize).min(all.len());
                let rows = &all[start..end];
                if rows.is_empty() {
                    break;
                }
                assert!(rows.len() <= PAGE_SIZE as usize);
                seen.extend_from_slice(rows);
                page += 1;
            }

            assert_eq!(seen, all);
            assert_eq!((page - 1) as i64, n_pages(total as i64));
        }
    }

    /// One record past a full page yields a second, one-row page.
    #[test]
    fn seven_records_make_two_pages() {
        let all: Vec<usize> = (0..7).collect();
        let take = |page: u32| {
            let p = Pagination::new(page);
            let start = (p.offset() as usize).min(all.len());
            let end = (start + p.limit() as usize).min(all.len());
            all[start..end].to_vec()
        };

        assert_eq!(take(1).len(), 6);
        assert_eq!(take(2).len(), 1);
        assert_eq!(take(3).len(), 0);
        assert_eq!(n_pages(7), 2);
    }
}
