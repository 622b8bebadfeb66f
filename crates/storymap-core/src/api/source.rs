//! User-facing table references

use serde::Serialize;
use url::Url;

use crate::error::SourceError;

/// A table as the user names it: wiki/base token plus table id.
///
/// The wiki token still has to be resolved to the app token the record
/// endpoints use; see [`BitableClient::resolve_table`](super::BitableClient::resolve_table).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TableSource {
    pub wiki_token: String,
    pub table_id: String,
}

impl TableSource {
    pub fn new(wiki_token: impl Into<String>, table_id: impl Into<String>) -> Self {
        Self {
            wiki_token: wiki_token.into(),
            table_id: table_id.into(),
        }
    }

    /// Parse `https://<host>/base/<token>?table=<id>` or `https://<host>/wiki/<token>?table=<id>`
    pub fn from_url(input: &str) -> Result<Self, SourceError> {
        let url = Url::parse(input.trim()).map_err(|e| SourceError::InvalidUrl(format!("{input}: {e}")))?;

        let mut segments = url
            .path_segments()
            .ok_or_else(|| SourceError::InvalidUrl(input.to_string()))?
            .filter(|s| !s.is_empty());
        let wiki_token = loop {
            match segments.next() {
                Some("base" | "wiki") => {
                    break segments
                        .next()
                        .map(str::to_string)
                        .ok_or_else(|| SourceError::MissingWikiToken(input.to_string()))?;
                }
                Some(_) => continue,
                None => return Err(SourceError::MissingWikiToken(input.to_string())),
            }
        };

        let table_id = url
            .query_pairs()
            .find(|(key, _)| key == "table")
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| SourceError::MissingTableId(input.to_string()))?;

        Ok(Self {
            wiki_token,
            table_id,
        })
    }
}

impl std::fmt::Display for TableSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.wiki_token, self.table_id)
    }
}

impl std::str::FromStr for TableSource {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_url(s)
    }
}
