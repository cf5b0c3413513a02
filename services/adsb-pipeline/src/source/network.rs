//! Network feeds: AVR raw text (`*<hex>;` lines, dump1090 port 30002) and
//! the Beast binary protocol (port 30005)

use std::fmt;
use std::str::FromStr;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, Split};
use tokio::net::TcpStream;
use tracing::info;

use super::{text_line, Acquired};
use crate::error::{ConfigError, SourceError};
use crate::frame::{FrameRecord, RawFrame};

const ESCAPE: u8 = 0x1a;

/// Wire format of a network feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetDatatype {
    Raw,
    Beast,
}

impl FromStr for NetDatatype {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(NetDatatype::Raw),
            "beast" => Ok(NetDatatype::Beast),
            _ => Err(ConfigError::UnsupportedDatatype(s.to_string())),
        }
    }
}

impl fmt::Display for NetDatatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetDatatype::Raw => f.write_str("raw"),
            NetDatatype::Beast => f.write_str("beast"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSource {
    pub host: String,
    pub port: u16,
    pub datatype: NetDatatype,
}

impl NetworkSource {
    pub fn new(host: impl Into<String>, port: u16, datatype: NetDatatype) -> Self {
        Self {
            host: host.into(),
            port,
            datatype,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) async fn open(&self) -> Result<NetworkReader, SourceError> {
        let addr = self.address();
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|source| SourceError::Connect {
                addr: addr.clone(),
                source,
            })?;
        info!("Connected to {} ({})", addr, self.datatype);

        Ok(match self.datatype {
            NetDatatype::Raw => NetworkReader::Raw {
                lines: BufReader::new(stream).split(b'\n'),
                origin: addr,
            },
            NetDatatype::Beast => NetworkReader::Beast {
                stream,
                decoder: BeastDecoder::default(),
                chunk: vec![0u8; 4096],
                origin: addr,
            },
        })
    }
}

pub(crate) enum NetworkReader {
    Raw {
        lines: Split<BufReader<TcpStream>>,
        origin: String,
    },
    Beast {
        stream: TcpStream,
        decoder: BeastDecoder,
        chunk: Vec<u8>,
        origin: String,
    },
}

impl NetworkReader {
    /// The peer closing the connection is a failure.
    pub(crate) async fn next(&mut self) -> Result<Option<Acquired>, SourceError> {
        match self {
            NetworkReader::Raw { lines, origin } => loop {
                let line = lines.next_segment().await.map_err(|source| SourceError::Read {
                    origin: origin.clone(),
                    source,
                })?;
                let Some(bytes) = line else {
                    return Err(closed(origin));
                };
                let line = match text_line(bytes) {
                    Ok(line) => line,
                    Err(e) => return Ok(Some(Acquired::Malformed(e))),
                };
                if let Some(frame) = RawFrame::from_line(&line) {
                    return Ok(Some(Acquired::Frame(FrameRecord::now(frame))));
                }
            },
            NetworkReader::Beast {
                stream,
                decoder,
                chunk,
                origin,
            } => loop {
                if let Some(message) = decoder.next_message() {
                    let frame = RawFrame::new(hex::encode_upper(message));
                    return Ok(Some(Acquired::Frame(FrameRecord::now(frame))));
                }

                let n = stream.read(chunk).await.map_err(|source| SourceError::Read {
                    origin: origin.clone(),
                    source,
                })?;
                if n == 0 {
                    return Err(closed(origin));
                }
                decoder.extend(&chunk[..n]);
            },
        }
    }
}

fn closed(origin: &str) -> SourceError {
    SourceError::Closed {
        origin: origin.to_string(),
        detail: "connection closed by peer".to_string(),
    }
}

/// Incremental Beast decoder.
///
/// A frame is `0x1a`, a type byte, a 6-byte receiver timestamp, one signal
/// byte and the message, with every `0x1a` inside escaped by doubling it.
/// Type `'2'` carries a 56-bit message, `'3'` a 112-bit one. Mode A/C
/// frames (`'1'`) are consumed and dropped.
#[derive(Debug, Default)]
pub struct BeastDecoder {
    buf: Vec<u8>,
}

impl BeastDecoder {
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next Mode S message, or `None` until more bytes arrive.
    pub fn next_message(&mut self) -> Option<Vec<u8>> {
        loop {
            let start = match self.buf.iter().position(|&b| b == ESCAPE) {
                Some(start) => start,
                None => {
                    self.buf.clear();
                    return None;
                }
            };
            self.buf.drain(..start);

            let kind = *self.buf.get(1)?;
            let message_len = match kind {
                b'1' => 2,
                b'2' => 7,
                b'3' => 14,
                _ => {
                    // not a frame start, resync on the next escape
                    self.buf.drain(..1);
                    continue;
                }
            };

            match unescape(&self.buf[2..], 6 + 1 + message_len) {
                Unescaped::Incomplete => return None,
                Unescaped::Broken(at) => {
                    self.buf.drain(..2 + at);
                }
                Unescaped::Done(payload, used) => {
                    self.buf.drain(..2 + used);
                    if kind != b'1' {
                        return Some(payload[7..].to_vec());
                    }
                }
            }
        }
    }
}

enum Unescaped {
    /// Payload bytes and how many input bytes they took.
    Done(Vec<u8>, usize),
    Incomplete,
    /// A lone escape at this offset starts a new frame.
    Broken(usize),
}

fn unescape(input: &[u8], len: usize) -> Unescaped {
    let mut out = Vec::with_capacity(len);
    let mut i = 0;
    while out.len() < len {
        let Some(&b) = input.get(i) else {
            return Unescaped::Incomplete;
        };
        if b == ESCAPE {
            match input.get(i + 1) {
                Some(&ESCAPE) => i += 1,
                Some(_) => return Unescaped::Broken(i),
                None => return Unescaped::Incomplete,
            }
        }
        out.push(b);
        i += 1;
    }
    Unescaped::Done(out, i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beast(kind: u8, message: &[u8]) -> Vec<u8> {
        let mut frame = vec![ESCAPE, kind];
        let mut body = vec![0x00, 0x01, 0x02, 0x03, 0x04, 0x1a, 0x80];
        body.extend_from_slice(message);
        for b in body {
            frame.push(b);
            if b == ESCAPE {
                frame.push(ESCAPE);
            }
        }
        frame
    }

    #[test]
    fn test_datatype_parsing() {
        assert_eq!("raw".parse::<NetDatatype>(), Ok(NetDatatype::Raw));
        assert_eq!("BEAST".parse::<NetDatatype>(), Ok(NetDatatype::Beast));
        assert_eq!(
            "skysense".parse::<NetDatatype>(),
            Err(ConfigError::UnsupportedDatatype("skysense".to_string()))
        );
    }

    #[test]
    fn test_beast_long_and_short() {
        let long = hex::decode("8D4840D6202CC371C32CE0576098").unwrap();
        let short = hex::decode("5D4840D61A1A1A").unwrap();

        let mut decoder = BeastDecoder::default();
        decoder.extend(&beast(b'3', &long));
        decoder.extend(&beast(b'2', &short));

        assert_eq!(decoder.next_message(), Some(long));
        assert_eq!(decoder.next_message(), Some(short));
        assert_eq!(decoder.next_message(), None);
    }

    #[test]
    fn test_beast_across_reads() {
        let long = hex::decode("8D4840D6202CC371C32CE0576098").unwrap();
        let bytes = beast(b'3', &long);
        let (head, tail) = bytes.split_at(9);

        let mut decoder = BeastDecoder::default();
        decoder.extend(head);
        assert_eq!(decoder.next_message(), None);
        decoder.extend(tail);
        assert_eq!(decoder.next_message(), Some(long));
    }

    #[test]
    fn test_beast_skips_mode_ac_and_garbage() {
        let long = hex::decode("8D4840D6202CC371C32CE0576098").unwrap();
        let mut bytes = vec![0xff, 0x00];
        bytes.extend(beast(b'1', &[0x12, 0x34]));
        bytes.extend(beast(b'3', &long));

        let mut decoder = BeastDecoder::default();
        decoder.extend(&bytes);
        assert_eq!(decoder.next_message(), Some(long));
    }

    #[test]
    fn test_beast_truncated_frame_resyncs() {
        let long = hex::decode("8D4840D6202CC371C32CE0576098").unwrap();
        let mut bytes = beast(b'3', &long);
        bytes.truncate(12);
        bytes.extend(beast(b'3', &long));

        let mut decoder = BeastDecoder::default();
        decoder.extend(&bytes);
        assert_eq!(decoder.next_message(), Some(long));
        assert_eq!(decoder.next_message(), None);
    }

    #[tokio::test]
    async fn test_raw_feed_close_is_a_failure() {
        use tokio::io::AsyncWriteExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"*8D4840D6202CC371C32CE0576098;\r\n")
                .await
                .unwrap();
        });

        let mut reader = NetworkSource::new("127.0.0.1", port, NetDatatype::Raw)
            .open()
            .await
            .unwrap();
        let Some(Acquired::Frame(record)) = reader.next().await.unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(record.frame().as_str(), "8D4840D6202CC371C32CE0576098");
        assert!(matches!(reader.next().await, Err(SourceError::Closed { .. })));
    }

    #[tokio::test]
    async fn test_raw_feed_survives_non_utf8_line() {
        use tokio::io::AsyncWriteExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"*\xff\xfe;\r\n*8D4840D6202CC371C32CE0576098;\r\n")
                .await
                .unwrap();
        });

        let mut reader = NetworkSource::new("127.0.0.1", port, NetDatatype::Raw)
            .open()
            .await
            .unwrap();
        assert!(matches!(
            reader.next().await.unwrap(),
            Some(Acquired::Malformed(crate::error::FrameError::NotUtf8))
        ));
        let Some(Acquired::Frame(record)) = reader.next().await.unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(record.frame().as_str(), "8D4840D6202CC371C32CE0576098");
    }
}
