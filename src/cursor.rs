//! Resumable pagination over an E-utilities history session.
//!
//! A [`SearchCursor`] holds the session tokens for one search term and hands
//! out one [`Page`] per [`SearchCursor::step`]. A caller may pass a new page
//! size into each step; that size is used for the request issued by the step,
//! while the position moves forward by the size of the request before it.

use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::domain::{ArchiveLocation, Database, LinkConvention, Page, SearchSession};
use crate::error::GeoError;
use crate::search::{SearchClient, SearchTransport};

pub const DEFAULT_PAGE_SIZE: usize = 10;

pub struct SearchCursor<'a, T: SearchTransport> {
    client: &'a SearchClient<T>,
    session: SearchSession,
    database: Database,
    convention: LinkConvention,
    position: usize,
    page_size: usize,
    last_request: Option<usize>,
    done: bool,
    cancel: CancellationToken,
}

impl<'a, T: SearchTransport> SearchCursor<'a, T> {
    /// Opens a history session for `term`. Fails with `SessionUnavailable`
    /// when the server does not hand back both tokens.
    pub fn open(
        client: &'a SearchClient<T>,
        term: &str,
        database: Database,
        page_size: usize,
    ) -> Result<Self, GeoError> {
        let session = client.open_session(term, database)?;
        info!(
            term,
            query_key = session.query_key(),
            "opened search session"
        );
        Ok(Self::from_session(client, session, database, page_size))
    }

    pub fn from_session(
        client: &'a SearchClient<T>,
        session: SearchSession,
        database: Database,
        page_size: usize,
    ) -> Self {
        Self {
            client,
            session,
            database,
            convention: LinkConvention::default(),
            position: 1,
            page_size: page_size.max(1),
            last_request: None,
            done: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_convention(mut self, convention: LinkConvention) -> Self {
        self.convention = convention;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn session(&self) -> &SearchSession {
        &self.session
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Fetches one page at an explicit position, outside the cursor's own state.
    pub fn next_page(&self, position: usize, page_size: usize) -> Result<Page, GeoError> {
        let summary =
            self.client
                .fetch_summary(&self.session, self.database, position.max(1), page_size.max(1))?;
        let entries = summary
            .ftp_links()
            .into_iter()
            .filter_map(|(uid, link)| {
                ArchiveLocation::from_ftp_link(&link, self.convention).map(|loc| (uid, loc))
            })
            .collect();
        Ok(Page { entries })
    }

    /// Advances the cursor. Returns `Ok(None)` once the search is exhausted.
    /// An empty page ends the search and is still returned once, even when
    /// the summary declared identifiers that had no usable `ftplink`.
    pub fn step(&mut self, next_page_size: Option<usize>) -> Result<Option<Page>, GeoError> {
        if self.done {
            return Ok(None);
        }
        if self.cancel.is_cancelled() {
            self.done = true;
            return Ok(None);
        }
        if let Some(size) = next_page_size {
            self.page_size = size.max(1);
        }
        if let Some(previous) = self.last_request {
            self.position += previous;
        }

        let page = self.next_page(self.position, self.page_size)?;
        self.last_request = Some(self.page_size);
        debug!(
            position = self.position,
            page_size = self.page_size,
            entries = page.len(),
            "fetched page"
        );
        if page.is_empty() {
            info!(position = self.position, "search exhausted");
            self.done = true;
        }
        Ok(Some(page))
    }
}

impl<T: SearchTransport> Iterator for SearchCursor<'_, T> {
    type Item = Result<Page, GeoError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step(None) {
            Ok(Some(page)) => Some(Ok(page)),
            Ok(None) => None,
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
