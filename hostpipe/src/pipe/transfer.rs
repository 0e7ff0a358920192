//! Scatter/gather transfers between guest buffer regions and a socket.
//!
//! A transfer request is an ordered list of byte regions treated as one
//! logical stream. Each call moves as many bytes as the stream accepts
//! without blocking, crossing region boundaries as it goes, and never
//! retries past a would-block: retrying is the caller's job once the next
//! readiness signal arrives.
//!
//! Resume is only tracked within a single call. After a partial result
//! the caller must pass the *remaining* regions (the unconsumed tail of
//! the stream) on the next call, not the original list again.

use super::error::PipeError;

use std::io;

/// A byte stream that can be driven one non-blocking call at a time.
///
/// Implementations must never block: when no progress is possible they
/// return an error of kind [`io::ErrorKind::WouldBlock`].
pub trait ByteStream {
    /// Sends as much of `buffer` as possible in one call.
    fn send_once(&mut self, buffer: &[u8]) -> io::Result<usize>;

    /// Receives up to `buffer.len()` bytes in one call.
    ///
    /// `Ok(0)` means the peer closed the stream.
    fn recv_once(&mut self, buffer: &mut [u8]) -> io::Result<usize>;
}

/// Sends the concatenation of `regions` to `stream`.
///
/// Returns the number of bytes sent. A partial count is returned as
/// success even if the next attempt failed; an error is only reported
/// when nothing could be sent at all.
pub fn send<S: ByteStream + ?Sized>(stream: &mut S, regions: &[&[u8]]) -> Result<usize, PipeError> {
    let lengths: Vec<usize> = regions.iter().map(|r| r.len()).collect();

    drive(&lengths, |region, offset| {
        stream.send_once(&regions[region][offset..])
    })
}

/// Receives from `stream` into the concatenation of `regions`.
///
/// Same accounting as [`send`]. End of stream before any byte was
/// received is reported as [`PipeError::Io`].
pub fn receive<S: ByteStream + ?Sized>(
    stream: &mut S,
    regions: &mut [&mut [u8]],
) -> Result<usize, PipeError> {
    let lengths: Vec<usize> = regions.iter().map(|r| r.len()).collect();

    drive(&lengths, |region, offset| {
        stream.recv_once(&mut regions[region][offset..])
    })
}

/// Runs the transfer loop over regions of the given lengths.
///
/// `attempt(region, offset)` performs one I/O call on the tail of region
/// `region` starting at `offset`.
fn drive<F>(lengths: &[usize], mut attempt: F) -> Result<usize, PipeError>
where
    F: FnMut(usize, usize) -> io::Result<usize>,
{
    let mut remaining: usize = lengths.iter().sum();
    let mut moved = 0;

    let mut region = 0;
    let mut offset = 0;

    while remaining > 0 {
        // Empty regions carry nothing; a zero-length call would read as
        // end of stream.
        while offset == lengths[region] {
            region += 1;
            offset = 0;
        }

        match attempt(region, offset) {
            Ok(0) => {
                if moved == 0 {
                    return Err(PipeError::Io);
                }
                break;
            }

            Ok(n) => {
                offset += n;
                if offset >= lengths[region] {
                    region += 1;
                    offset = 0;
                }

                remaining -= n;
                moved += n;
            }

            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,

            Err(err) => {
                if moved > 0 {
                    break;
                }
                return Err(PipeError::from_io(&err));
            }
        }
    }

    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory stream accepting at most `budget` bytes per transfer call.
    struct Throttled {
        budget: usize,
        left: usize,
        sink: Vec<u8>,
        source: Vec<u8>,
        eof: bool,
        fail: Option<io::ErrorKind>,
    }

    impl Throttled {
        fn new(budget: usize) -> Self {
            Self {
                budget,
                left: budget,
                sink: Vec::new(),
                source: Vec::new(),
                eof: false,
                fail: None,
            }
        }

        fn refill(&mut self) {
            self.left = self.budget;
        }
    }

    impl ByteStream for Throttled {
        fn send_once(&mut self, buffer: &[u8]) -> io::Result<usize> {
            if let Some(kind) = self.fail {
                return Err(kind.into());
            }
            if self.left == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }

            let n = buffer.len().min(self.left);
            self.sink.extend_from_slice(&buffer[..n]);
            self.left -= n;
            Ok(n)
        }

        fn recv_once(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
            if let Some(kind) = self.fail {
                return Err(kind.into());
            }
            if self.source.is_empty() {
                if self.eof {
                    return Ok(0);
                }
                return Err(io::ErrorKind::WouldBlock.into());
            }
            if self.left == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }

            let n = buffer.len().min(self.left).min(self.source.len());
            buffer[..n].copy_from_slice(&self.source[..n]);
            self.source.drain(..n);
            self.left -= n;
            Ok(n)
        }
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    /// Returns the unconsumed tail of `regions` after `consumed` bytes.
    fn remaining<'a>(regions: &[&'a [u8]], mut consumed: usize) -> Vec<&'a [u8]> {
        let mut out = Vec::new();
        for region in regions {
            if consumed >= region.len() {
                consumed -= region.len();
                continue;
            }
            out.push(&region[consumed..]);
            consumed = 0;
        }
        out
    }

    #[test]
    fn test_send_spans_regions_then_resumes_with_tail() {
        let first = pattern(200, 1);
        let second = pattern(100, 2);
        let regions: Vec<&[u8]> = vec![first.as_slice(), second.as_slice()];

        let mut stream = Throttled::new(256);

        let sent = send(&mut stream, &regions).unwrap();
        assert_eq!(sent, 256);

        stream.refill();
        let tail = remaining(&regions, sent);
        assert_eq!(tail.iter().map(|r| r.len()).sum::<usize>(), 44);

        let sent = send(&mut stream, &tail).unwrap();
        assert_eq!(sent, 44);

        let expected: Vec<u8> = first.iter().chain(second.iter()).copied().collect();
        assert_eq!(stream.sink, expected);
    }

    #[test]
    fn test_throttled_sends_move_every_byte_exactly_once() {
        let layouts: &[&[usize]] = &[&[1], &[7, 0, 9], &[64, 64, 64], &[0, 300, 1, 2], &[513]];

        for layout in layouts {
            for budget in [1usize, 3, 17, 64, 1000] {
                let buffers: Vec<Vec<u8>> = layout
                    .iter()
                    .enumerate()
                    .map(|(i, len)| pattern(*len, i as u8))
                    .collect();
                let regions: Vec<&[u8]> = buffers.iter().map(|b| b.as_slice()).collect();
                let total: usize = layout.iter().sum();

                let mut stream = Throttled::new(budget);
                let mut done = 0;

                while done < total {
                    stream.refill();
                    let tail = remaining(&regions, done);
                    done += send(&mut stream, &tail).unwrap();
                }

                let expected: Vec<u8> = buffers.concat();
                assert_eq!(done, total, "layout {layout:?} budget {budget}");
                assert_eq!(stream.sink, expected, "layout {layout:?} budget {budget}");
            }
        }
    }

    #[test]
    fn test_receive_fills_regions_in_order() {
        let mut stream = Throttled::new(5);
        stream.source = b"hello world".to_vec();

        let mut a = [0u8; 3];
        let mut b = [0u8; 8];

        let n = receive(&mut stream, &mut [&mut a, &mut b]).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&a, b"hel");
        assert_eq!(&b[..2], b"lo");

        stream.refill();
        let n = receive(&mut stream, &mut [&mut b[2..]]).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&b[2..7], b" worl");
    }

    #[test]
    fn test_would_block_without_progress_is_again() {
        let mut stream = Throttled::new(0);
        let data = [1u8; 4];

        assert_eq!(send(&mut stream, &[&data]), Err(PipeError::Again));

        let mut buf = [0u8; 4];
        assert_eq!(receive(&mut stream, &mut [&mut buf]), Err(PipeError::Again));
    }

    #[test]
    fn test_end_of_stream_without_progress_is_io() {
        let mut stream = Throttled::new(16);
        stream.eof = true;

        let mut buf = [0u8; 4];
        assert_eq!(receive(&mut stream, &mut [&mut buf]), Err(PipeError::Io));
    }

    #[test]
    fn test_end_of_stream_after_progress_reports_partial() {
        let mut stream = Throttled::new(16);
        stream.source = b"ab".to_vec();
        stream.eof = true;

        let mut buf = [0u8; 4];
        assert_eq!(receive(&mut stream, &mut [&mut buf]), Ok(2));
    }

    #[test]
    fn test_fatal_error_without_progress_is_io() {
        let mut stream = Throttled::new(16);
        stream.fail = Some(io::ErrorKind::BrokenPipe);

        assert_eq!(send(&mut stream, &[b"abc"]), Err(PipeError::Io));
    }

    #[test]
    fn test_empty_request_moves_nothing() {
        let mut stream = Throttled::new(16);

        assert_eq!(send(&mut stream, &[]), Ok(0));
        assert_eq!(send(&mut stream, &[&[], &[]]), Ok(0));
    }
}
