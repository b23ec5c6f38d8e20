//! Payloads carried by inserted structs.
//!
//! The store only needs to know how long a payload is and how to cut it in
//! two; what the payload means belongs to the shared-type layer above.

use serde_json::Value;

// =============================================================================
// Type references
// =============================================================================

/// The kind of container a type item creates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Array,
    Map,
    Text,
}

impl TypeRef {
    pub(crate) fn tag(&self) -> u8 {
        return match self {
            TypeRef::Array => 0,
            TypeRef::Map => 1,
            TypeRef::Text => 2,
        };
    }

    pub(crate) fn from_tag(tag: u8) -> Option<TypeRef> {
        return match tag {
            0 => Some(TypeRef::Array),
            1 => Some(TypeRef::Map),
            2 => Some(TypeRef::Text),
            _ => None,
        };
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// The payload of an item.
#[derive(Clone, Debug, PartialEq)]
pub enum Content {
    /// Text. Length is the number of chars.
    String(String),
    /// JSON values. Length is the number of values.
    Any(Vec<Value>),
    /// An opaque byte blob. Always length 1.
    Binary(Vec<u8>),
    /// A nested container. Always length 1.
    Type(TypeRef),
    /// A payload discarded by garbage collection; only the length remains.
    Deleted(u32),
}

impl Content {
    /// Number of clock ticks this payload occupies.
    pub fn len(&self) -> u32 {
        return match self {
            Content::String(s) => s.chars().count() as u32,
            Content::Any(values) => values.len() as u32,
            Content::Binary(_) => 1,
            Content::Type(_) => 1,
            Content::Deleted(len) => *len,
        };
    }

    /// True if the payload occupies no clock ticks.
    pub fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    /// Whether this payload contributes to the visible length of its parent.
    pub fn is_countable(&self) -> bool {
        return !matches!(self, Content::Deleted(_));
    }

    /// Split this payload at `offset`, keeping `[0, offset)` and returning
    /// `[offset, len)`.
    ///
    /// Only multi-unit payloads can be split; the caller guarantees
    /// `0 < offset < len`.
    pub fn splice(&mut self, offset: u32) -> Content {
        debug_assert!(offset > 0 && offset < self.len());
        return match self {
            Content::String(s) => {
                let at = s
                    .char_indices()
                    .nth(offset as usize)
                    .map(|(i, _)| i)
                    .unwrap_or(s.len());
                Content::String(s.split_off(at))
            }
            Content::Any(values) => Content::Any(values.split_off(offset as usize)),
            Content::Deleted(len) => {
                let right = *len - offset;
                *len = offset;
                Content::Deleted(right)
            }
            // Single-unit payloads never reach here.
            Content::Binary(_) | Content::Type(_) => unreachable!("cannot split a unit payload"),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_length_counts_chars() {
        assert_eq!(Content::String("héllo".to_string()).len(), 5);
    }

    #[test]
    fn splice_string_on_char_boundary() {
        let mut left = Content::String("añb".to_string());
        let right = left.splice(2);
        assert_eq!(left, Content::String("añ".to_string()));
        assert_eq!(right, Content::String("b".to_string()));
    }

    #[test]
    fn splice_any() {
        let mut left = Content::Any(vec![json!(1), json!("two"), json!(null)]);
        let right = left.splice(1);
        assert_eq!(left.len(), 1);
        assert_eq!(right, Content::Any(vec![json!("two"), json!(null)]));
    }

    #[test]
    fn splice_deleted() {
        let mut left = Content::Deleted(10);
        let right = left.splice(4);
        assert_eq!(left, Content::Deleted(4));
        assert_eq!(right, Content::Deleted(6));
        assert!(!left.is_countable());
    }

    #[test]
    fn type_ref_tags_round_trip() {
        for kind in [TypeRef::Array, TypeRef::Map, TypeRef::Text] {
            assert_eq!(TypeRef::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(TypeRef::from_tag(9), None);
    }
}
