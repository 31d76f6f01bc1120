//! The `org.gnome.shell favorite-apps` list as an ordered set.
//!
//! gsettings prints string arrays in GVariant text form: `['a.desktop', 'b.desktop']`,
//! or `@as []` when empty. Either quote style may appear, with backslash escapes.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FavoritesError {
    #[error("not a string array: {0}")]
    NotAnArray(String),
    #[error("unterminated string in favorites list")]
    Unterminated,
    #[error("unexpected '{found}' at position {position} in favorites list")]
    Unexpected { found: char, position: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FavoriteApps {
    ids: Vec<String>,
}

impl FavoriteApps {
    pub fn parse(text: &str) -> Result<Self, FavoritesError> {
        let trimmed = text.trim();
        let body = trimmed
            .strip_prefix("@as")
            .map(str::trim_start)
            .unwrap_or(trimmed);

        let inner = body
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| FavoritesError::NotAnArray(trimmed.to_string()))?;

        let mut favorites = Self::default();
        let mut chars = inner.char_indices();
        let mut expect_item = true;

        while let Some((position, c)) = chars.next() {
            match c {
                c if c.is_whitespace() => {}
                ',' if !expect_item => expect_item = true,
                '\'' | '"' if expect_item => {
                    let mut id = String::new();
                    let mut closed = false;
                    while let Some((_, next)) = chars.next() {
                        match next {
                            '\\' => match chars.next() {
                                Some((_, escaped)) => id.push(escaped),
                                None => return Err(FavoritesError::Unterminated),
                            },
                            q if q == c => {
                                closed = true;
                                break;
                            }
                            other => id.push(other),
                        }
                    }
                    if !closed {
                        return Err(FavoritesError::Unterminated);
                    }
                    favorites.insert(id);
                    expect_item = false;
                }
                found => return Err(FavoritesError::Unexpected { found, position }),
            }
        }

        Ok(favorites)
    }

    /// Append `id` unless present. Returns whether the list changed.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.contains(&id) {
            return false;
        }
        self.ids.push(id);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|existing| existing == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn to_gvariant(&self) -> String {
        if self.is_empty() {
            return "@as []".to_string();
        }
        let items: Vec<String> = self.iter().map(quote).collect();
        format!("[{}]", items.join(", "))
    }
}

impl fmt::Display for FavoriteApps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_gvariant())
    }
}

/// Single-quoted GVariant string literal
pub fn quote(value: &str) -> String {
    let escaped = value.replace('\\', r"\\").replace('\'', r"\'");
    format!("'{escaped}'")
}
