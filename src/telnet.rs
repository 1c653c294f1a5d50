//! Minimal telnet framing for router administration shells.
//!
//! The router speaks plain NVT text but may open with option negotiations.
//! [`TelnetCodec`] separates data bytes from IAC command sequences so the
//! prompt-wait engine only ever sees shell text. Subnegotiation payloads are
//! discarded, and the session answers every proposal with a refusal.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;

/// A unit of the telnet stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetFrame {
    /// Shell text with IAC escapes removed.
    Data(Bytes),
    /// Option negotiation: `IAC <WILL|WONT|DO|DONT> <option>`.
    Negotiate { command: u8, option: u8 },
    /// Any other two-byte command (`IAC NOP`, `IAC GA`, ...).
    Command(u8),
}

impl TelnetFrame {
    /// Answer that declines a negotiation proposal.
    ///
    /// Returns `None` for WONT/DONT, which need no reply.
    pub fn refusal(&self) -> Option<TelnetFrame> {
        match *self {
            TelnetFrame::Negotiate {
                command: DO,
                option,
            } => Some(TelnetFrame::Negotiate {
                command: WONT,
                option,
            }),
            TelnetFrame::Negotiate {
                command: WILL,
                option,
            } => Some(TelnetFrame::Negotiate {
                command: DONT,
                option,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum DecoderState {
    #[default]
    Data,
    Iac,
    Negotiate(u8),
    Subnegotiation,
    SubnegotiationIac,
}

/// Codec turning a raw telnet byte stream into [`TelnetFrame`]s.
#[derive(Debug, Default)]
pub struct TelnetCodec {
    state: DecoderState,
    data: BytesMut,
    queued: Option<TelnetFrame>,
}

impl TelnetCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn flush_before(&mut self, frame: TelnetFrame) -> TelnetFrame {
        if self.data.is_empty() {
            frame
        } else {
            self.queued = Some(frame);
            TelnetFrame::Data(self.data.split().freeze())
        }
    }
}

impl Decoder for TelnetCodec {
    type Item = TelnetFrame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.queued.take() {
            return Ok(Some(frame));
        }

        while src.has_remaining() {
            let byte = src.get_u8();
            match self.state {
                DecoderState::Data => {
                    if byte == IAC {
                        self.state = DecoderState::Iac;
                    } else {
                        self.data.put_u8(byte);
                    }
                }
                DecoderState::Iac => match byte {
                    IAC => {
                        self.data.put_u8(IAC);
                        self.state = DecoderState::Data;
                    }
                    WILL | WONT | DO | DONT => self.state = DecoderState::Negotiate(byte),
                    SB => self.state = DecoderState::Subnegotiation,
                    command => {
                        self.state = DecoderState::Data;
                        return Ok(Some(self.flush_before(TelnetFrame::Command(command))));
                    }
                },
                DecoderState::Negotiate(command) => {
                    self.state = DecoderState::Data;
                    let frame = TelnetFrame::Negotiate {
                        command,
                        option: byte,
                    };
                    return Ok(Some(self.flush_before(frame)));
                }
                DecoderState::Subnegotiation => {
                    if byte == IAC {
                        self.state = DecoderState::SubnegotiationIac;
                    }
                }
                DecoderState::SubnegotiationIac => {
                    self.state = if byte == SE {
                        DecoderState::Data
                    } else {
                        DecoderState::Subnegotiation
                    };
                }
            }
        }

        if self.data.is_empty() {
            Ok(None)
        } else {
            Ok(Some(TelnetFrame::Data(self.data.split().freeze())))
        }
    }
}

impl Encoder<TelnetFrame> for TelnetCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: TelnetFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            TelnetFrame::Data(data) => {
                dst.reserve(data.len());
                for byte in data {
                    if byte == IAC {
                        dst.put_u8(IAC);
                    }
                    dst.put_u8(byte);
                }
            }
            TelnetFrame::Negotiate { command, option } => {
                dst.put_slice(&[IAC, command, option]);
            }
            TelnetFrame::Command(command) => {
                dst.put_slice(&[IAC, command]);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut TelnetCodec, input: &[u8]) -> Vec<TelnetFrame> {
        let mut buf = BytesMut::from(input);
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).expect("decode") {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn negotiation_is_split_from_prompt_text() {
        let mut codec = TelnetCodec::new();
        let frames = decode_all(&mut codec, &[IAC, DO, 1, b'L', b'o', b'g', b'i', b'n', b':']);

        assert_eq!(
            frames,
            vec![
                TelnetFrame::Negotiate {
                    command: DO,
                    option: 1
                },
                TelnetFrame::Data(Bytes::from_static(b"Login:")),
            ]
        );
    }

    #[test]
    fn pending_text_is_emitted_before_a_command() {
        let mut codec = TelnetCodec::new();
        let frames = decode_all(&mut codec, &[b'o', b'k', IAC, WILL, 3, b'!']);

        assert_eq!(
            frames,
            vec![
                TelnetFrame::Data(Bytes::from_static(b"ok")),
                TelnetFrame::Negotiate {
                    command: WILL,
                    option: 3
                },
                TelnetFrame::Data(Bytes::from_static(b"!")),
            ]
        );
    }

    #[test]
    fn sequence_split_across_reads_is_reassembled() {
        let mut codec = TelnetCodec::new();
        assert!(decode_all(&mut codec, &[IAC]).is_empty());
        let frames = decode_all(&mut codec, &[WILL, 1, b'x']);

        assert_eq!(frames.len(), 2);
        assert_eq!(
            frames[0],
            TelnetFrame::Negotiate {
                command: WILL,
                option: 1
            }
        );
    }

    #[test]
    fn escaped_iac_and_subnegotiation_are_handled() {
        let mut codec = TelnetCodec::new();
        let frames = decode_all(
            &mut codec,
            &[b'a', IAC, IAC, IAC, SB, 24, 1, IAC, IAC, IAC, SE, b'b'],
        );

        assert_eq!(frames, vec![TelnetFrame::Data(Bytes::from(vec![b'a', IAC, b'b']))]);
    }

    #[test]
    fn encoder_escapes_iac_in_data() {
        let mut codec = TelnetCodec::new();
        let mut dst = BytesMut::new();
        codec
            .encode(TelnetFrame::Data(Bytes::from(vec![b'a', IAC])), &mut dst)
            .expect("encode");
        codec
            .encode(
                TelnetFrame::Negotiate {
                    command: WONT,
                    option: 1,
                },
                &mut dst,
            )
            .expect("encode");

        assert_eq!(&dst[..], &[b'a', IAC, IAC, IAC, WONT, 1]);
    }

    #[test]
    fn refusals_decline_proposals_only() {
        let will = TelnetFrame::Negotiate {
            command: WILL,
            option: 1,
        };
        let dont = TelnetFrame::Negotiate {
            command: DONT,
            option: 1,
        };

        assert_eq!(
            will.refusal(),
            Some(TelnetFrame::Negotiate {
                command: DONT,
                option: 1
            })
        );
        assert_eq!(dont.refusal(), None);
        assert_eq!(TelnetFrame::Command(241).refusal(), None);
    }
}
