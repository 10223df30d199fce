/// Real time text specific state of a stream.
#[derive(Debug, Default)]
pub struct TextState {
    sent_chars: usize,
}

impl TextState {
    /// Characters sent so far.
    pub fn sent_chars(&self) -> usize {
        self.sent_chars
    }

    pub(crate) fn count_sent(&mut self) {
        self.sent_chars += 1;
    }
}
