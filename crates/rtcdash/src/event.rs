use bytes::Bytes;

/// Output of the WebM muxer, in the order it was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxEvent {
    /// EBML header, segment info and tracks. Comes first, at most once.
    Initial(Bytes),
    /// Start of a new cluster.
    Cluster {
        payload: Bytes,
        /// Duration of the cluster that just ended, in timescale units.
        /// `None` or `Some(0)` for the first cluster.
        previous_duration: Option<u64>,
    },
    /// A block of the current cluster.
    Block(Bytes),
}

impl MuxEvent {
    pub fn kind(&self) -> MuxEventKind {
        match self {
            MuxEvent::Initial(_) => MuxEventKind::Initial,
            MuxEvent::Cluster { .. } => MuxEventKind::Cluster,
            MuxEvent::Block(_) => MuxEventKind::Block,
        }
    }

    pub fn payload(&self) -> &Bytes {
        match self {
            MuxEvent::Initial(payload) | MuxEvent::Block(payload) => payload,
            MuxEvent::Cluster { payload, .. } => payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxEventKind {
    Initial,
    Cluster,
    Block,
}

impl MuxEventKind {
    pub fn from_name(input: &str) -> Option<Self> {
        match input {
            "initial" => Some(Self::Initial),
            "cluster" => Some(Self::Cluster),
            "block" => Some(Self::Block),
            _ => None,
        }
    }
}

/// Loosely tagged value emitted by muxers that report every field as optional.
#[derive(Debug, Default, Clone)]
pub struct MuxOutput {
    pub kind: Option<MuxEventKind>,
    pub save_to_file: Option<Bytes>,
    pub previous_duration: Option<u64>,
}

impl MuxOutput {
    /// Values without a kind or without anything to save carry nothing to record.
    pub fn into_event(self) -> Option<MuxEvent> {
        let payload = self.save_to_file?;
        Some(match self.kind? {
            MuxEventKind::Initial => MuxEvent::Initial(payload),
            MuxEventKind::Cluster => MuxEvent::Cluster {
                payload,
                previous_duration: self.previous_duration,
            },
            MuxEventKind::Block => MuxEvent::Block(payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_event() {
        let output = MuxOutput {
            kind: MuxEventKind::from_name("cluster"),
            save_to_file: Some(Bytes::from_static(b"cluster")),
            previous_duration: Some(500),
        };
        let event = output.into_event().unwrap();
        assert_eq!(event.kind(), MuxEventKind::Cluster);
        assert_eq!(event.payload(), &Bytes::from_static(b"cluster"));
        assert_eq!(
            event,
            MuxEvent::Cluster {
                payload: Bytes::from_static(b"cluster"),
                previous_duration: Some(500),
            }
        );
    }

    #[test]
    fn test_incomplete_output_is_dropped() {
        let no_payload = MuxOutput {
            kind: Some(MuxEventKind::Block),
            ..Default::default()
        };
        assert_eq!(no_payload.into_event(), None);

        let no_kind = MuxOutput {
            kind: MuxEventKind::from_name("cues"),
            save_to_file: Some(Bytes::from_static(b"cues")),
            previous_duration: None,
        };
        assert_eq!(no_kind.into_event(), None);
    }
}
