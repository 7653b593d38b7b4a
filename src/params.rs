//! Parameters of the receive primitive.

use crate::handle::{CommHandle, StatusHandle};
use crate::messenger::Messenger;
use crate::ReduceOp;

/// Rank to receive from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Source {
    /// Match any sender
    #[default]
    Any,
    /// A specific rank
    Rank(i32),
}

impl Source {
    /// The 32-bit value the library expects, wildcard mapped to its sentinel.
    pub fn encode(self, messenger: &dyn Messenger) -> i32 {
        match self {
            Source::Any => messenger.any_source(),
            Source::Rank(rank) => rank,
        }
    }

    /// Inverse of [`encode`](Self::encode).
    pub fn decode(raw: i32, messenger: &dyn Messenger) -> Self {
        if raw == messenger.any_source() {
            Source::Any
        } else {
            Source::Rank(raw)
        }
    }
}

impl From<i32> for Source {
    fn from(rank: i32) -> Self {
        Source::Rank(rank)
    }
}

/// Message tag to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Tag {
    /// Match any tag
    #[default]
    Any,
    /// A specific tag
    Value(i32),
}

impl Tag {
    /// The 32-bit value the library expects, wildcard mapped to its sentinel.
    pub fn encode(self, messenger: &dyn Messenger) -> i32 {
        match self {
            Tag::Any => messenger.any_tag(),
            Tag::Value(tag) => tag,
        }
    }

    /// Inverse of [`encode`](Self::encode).
    pub fn decode(raw: i32, messenger: &dyn Messenger) -> Self {
        if raw == messenger.any_tag() {
            Tag::Any
        } else {
            Tag::Value(raw)
        }
    }
}

impl From<i32> for Tag {
    fn from(tag: i32) -> Self {
        Tag::Value(tag)
    }
}

/// Parameters bound to one receive.
///
/// Defaults: any source, any tag, no status buffer, [`ReduceOp::Sum`] as the
/// combine operator consulted by the derivative rule.
///
/// # Example
///
/// ```no_run
/// # use mpiprim::{CommHandle, RecvParams, StatusHandle};
/// # fn demo(world: CommHandle, status: StatusHandle) {
/// let params = RecvParams::new(world).source(1).tag(7).status(status);
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvParams {
    /// Rank to receive from
    pub source: Source,
    /// Tag to match
    pub tag: Tag,
    /// Communicator the message arrives on
    pub comm: CommHandle,
    /// Buffer receiving completion metadata
    pub status: Option<StatusHandle>,
    /// Combine operator consulted by the derivative rule
    pub op: ReduceOp,
}

impl RecvParams {
    /// Receive from anyone with any tag on `comm`.
    pub fn new(comm: CommHandle) -> Self {
        RecvParams {
            source: Source::Any,
            tag: Tag::Any,
            comm,
            status: None,
            op: ReduceOp::Sum,
        }
    }

    /// Set the source rank.
    pub fn source(mut self, source: impl Into<Source>) -> Self {
        self.source = source.into();
        self
    }

    /// Set the tag.
    pub fn tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Request completion metadata in `status`.
    pub fn status(mut self, status: StatusHandle) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the combine operator.
    pub fn op(mut self, op: ReduceOp) -> Self {
        self.op = op;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{Loopback, ANY_SOURCE, ANY_TAG};

    #[test]
    fn wildcards_encode_to_library_sentinels() {
        let lib = Loopback::new();
        assert_eq!(Source::Any.encode(&lib), ANY_SOURCE);
        assert_eq!(Tag::Any.encode(&lib), ANY_TAG);
        assert_ne!(Source::Any.encode(&lib), 0);
        assert_ne!(Source::Any.encode(&lib), -1);
        assert_ne!(Tag::Any.encode(&lib), 0);
    }

    #[test]
    fn sentinels_decode_to_wildcards() {
        let lib = Loopback::new();
        for source in [Source::Any, Source::Rank(0), Source::Rank(5)] {
            assert_eq!(Source::decode(source.encode(&lib), &lib), source);
        }
        for tag in [Tag::Any, Tag::Value(0), Tag::Value(99)] {
            assert_eq!(Tag::decode(tag.encode(&lib), &lib), tag);
        }
    }

    #[test]
    fn builder_defaults() {
        let lib = Loopback::new();
        let params = RecvParams::new(lib.world());
        assert_eq!(params.source, Source::Any);
        assert_eq!(params.tag, Tag::Any);
        assert_eq!(params.status, None);
        assert_eq!(params.op, ReduceOp::Sum);

        let params = params.source(3).tag(11).op(ReduceOp::Max);
        assert_eq!(params.source, Source::Rank(3));
        assert_eq!(params.tag, Tag::Value(11));
        assert_eq!(params.op, ReduceOp::Max);
    }
}
