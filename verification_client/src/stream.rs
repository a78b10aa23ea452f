//! Incremental decoding of the streaming protocol body: log lines first,
//! then, after the sentinel, a serialized result set up to end of stream.

pub const RESULTS_SENTINEL: &[u8] = b"__RESULTS__";

#[derive(Debug, Default)]
pub struct StreamDecoder {
    /// Bytes of a log line that has not seen its newline yet.
    pending: Vec<u8>,
    /// Result payload, once the sentinel has been seen.
    payload: Option<Vec<u8>>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn in_results(&self) -> bool {
        self.payload.is_some()
    }

    /// Feeds one body increment and returns the log lines it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        if let Some(payload) = self.payload.as_mut() {
            payload.extend_from_slice(chunk);
            return Vec::new();
        }

        self.pending.extend_from_slice(chunk);

        if let Some(at) = find(&self.pending, RESULTS_SENTINEL) {
            let rest = self.pending.split_off(at + RESULTS_SENTINEL.len());
            self.pending.truncate(at);
            let before = std::mem::take(&mut self.pending);
            self.payload = Some(rest);
            return split_lines(&before);
        }

        match self.pending.iter().rposition(|b| *b == b'\n') {
            Some(last_newline) => {
                let rest = self.pending.split_off(last_newline + 1);
                let complete = std::mem::replace(&mut self.pending, rest);
                split_lines(&complete)
            }
            None => Vec::new(),
        }
    }

    /// Ends the stream: returns any unterminated log line and the result
    /// payload text, if the sentinel appeared.
    pub fn finish(self) -> (Vec<String>, Option<String>) {
        let lines = split_lines(&self.pending);
        let payload = self
            .payload
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
        (lines, payload)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}
