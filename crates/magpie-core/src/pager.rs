use std::future::Future;

use crate::error::HarvestError;
use crate::models::{Cursor, Page};

/// Cursor-driven walker over a paginated remote collection.
///
/// The pager owns only the continuation state: it hands the current
/// cursor to a caller-supplied fetch function and decides when the
/// collection is finished. It terminates when a page comes back with an
/// empty item list or no next cursor, whatever the cursor value. A fetch
/// error is surfaced to the caller *without advancing the cursor*, so
/// the caller's policy (retry the same page, or give up on the entity)
/// applies cleanly. Inter-page delays are the caller's business too.
#[derive(Debug)]
pub struct Pager {
    cursor: Option<Cursor>,
    exhausted: bool,
    pages_served: usize,
}

impl Pager {
    pub fn new() -> Self {
        Self {
            cursor: None,
            exhausted: false,
            pages_served: 0,
        }
    }

    /// Whether the collection has been fully walked.
    pub fn exhausted(&self) -> bool {
        self.exhausted
    }

    /// Pages successfully fetched so far.
    pub fn pages_served(&self) -> usize {
        self.pages_served
    }

    /// Fetch the next page. Returns `Ok(None)` once the collection is
    /// exhausted; callers typically loop `while let Some(page) = ...`.
    pub async fn next_page<T, F, Fut>(&mut self, fetch: F) -> Result<Option<Page<T>>, HarvestError>
    where
        F: FnOnce(Option<Cursor>) -> Fut,
        Fut: Future<Output = Result<Page<T>, HarvestError>>,
    {
        if self.exhausted {
            return Ok(None);
        }

        let page = fetch(self.cursor.clone()).await?;
        self.pages_served += 1;

        if page.items.is_empty() || page.next.is_none() {
            self.exhausted = true;
        } else {
            self.cursor = page.next.clone();
        }

        Ok(Some(page))
    }
}

impl Default for Pager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_of(items: Vec<u32>, next: Option<&str>) -> Page<u32> {
        Page {
            items,
            next: next.map(Cursor::from),
        }
    }

    #[tokio::test]
    async fn walks_until_missing_next_cursor() {
        let mut pager = Pager::new();
        let mut seen = Vec::new();

        loop {
            let page = pager
                .next_page(|cursor| async move {
                    Ok(match cursor.as_deref_inner() {
                        None => page_of(vec![1, 2], Some("c1")),
                        Some("c1") => page_of(vec![3], Some("c2")),
                        Some("c2") => page_of(vec![4], None),
                        other => panic!("unexpected cursor {other:?}"),
                    })
                })
                .await
                .unwrap();
            let Some(page) = page else { break };
            seen.extend(page.items);
        }

        assert_eq!(seen, vec![1, 2, 3, 4]);
        assert!(pager.exhausted());
        assert_eq!(pager.pages_served(), 3);
    }

    #[tokio::test]
    async fn empty_page_terminates_even_with_a_cursor() {
        let mut pager = Pager::new();

        let first = pager
            .next_page(|_| async { Ok(page_of(vec![], Some("dangling"))) })
            .await
            .unwrap();
        assert!(first.unwrap().items.is_empty());
        assert!(pager.exhausted());

        // Exhausted pagers never invoke the fetch function again.
        let second = pager
            .next_page(|_| async { Ok(page_of(vec![9], Some("more"))) })
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(pager.pages_served(), 1);
    }

    #[tokio::test]
    async fn error_does_not_advance_the_cursor() {
        let mut pager = Pager::new();

        // First page succeeds and advances to "c1".
        pager
            .next_page(|_| async { Ok(page_of(vec![1], Some("c1"))) })
            .await
            .unwrap();

        // A failed fetch leaves the pager on "c1"...
        let err = pager
            .next_page(|cursor| async move {
                assert_eq!(cursor.as_deref_inner(), Some("c1"));
                Err::<Page<u32>, _>(HarvestError::Network("flaky".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::Network(_)));

        // ...so the retry fetches the same page.
        let retried = pager
            .next_page(|cursor| async move {
                assert_eq!(cursor.as_deref_inner(), Some("c1"));
                Ok(page_of(vec![2], None))
            })
            .await
            .unwrap();
        assert_eq!(retried.unwrap().items, vec![2]);
        assert!(pager.exhausted());
    }

    // Small helper so the closures above can match on &str.
    trait CursorOpt {
        fn as_deref_inner(&self) -> Option<&str>;
    }

    impl CursorOpt for Option<Cursor> {
        fn as_deref_inner(&self) -> Option<&str> {
            self.as_ref().map(|c| c.as_str())
        }
    }
}
