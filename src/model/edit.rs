/// A buffer change reported to the marker tree after it has been applied
///
/// `old_length` bytes starting at `offset` were replaced by `new_length` bytes.
/// Insertions have `old_length == 0`, deletions `new_length == 0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DocumentEvent {
    pub offset: usize,
    pub old_length: usize,
    pub new_length: usize,
    /// The whole buffer content was swapped (reload, external change)
    pub whole_text_replaced: bool,
}

impl DocumentEvent {
    /// Create an insert event
    pub fn insert(offset: usize, len: usize) -> Self {
        Self::replace(offset, 0, len)
    }

    /// Create a delete event
    pub fn delete(offset: usize, len: usize) -> Self {
        Self::replace(offset, len, 0)
    }

    pub fn replace(offset: usize, old_length: usize, new_length: usize) -> Self {
        Self {
            offset,
            old_length,
            new_length,
            whole_text_replaced: false,
        }
    }

    /// Replace a buffer of `old_length` bytes by one of `new_length` bytes
    pub fn whole_text(old_length: usize, new_length: usize) -> Self {
        Self {
            offset: 0,
            old_length,
            new_length,
            whole_text_replaced: true,
        }
    }

    /// End of the replaced span in pre-edit coordinates
    pub fn old_end(&self) -> usize {
        self.offset + self.old_length
    }

    /// End of the inserted text in post-edit coordinates
    pub fn new_end(&self) -> usize {
        self.offset + self.new_length
    }

    /// Signed displacement applied to everything after the replaced span
    pub fn shift(&self) -> i64 {
        self.new_length as i64 - self.old_length as i64
    }

    pub fn is_insertion(&self) -> bool {
        self.old_length == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift_sign() {
        assert_eq!(DocumentEvent::insert(3, 4).shift(), 4);
        assert_eq!(DocumentEvent::delete(3, 4).shift(), -4);
        assert_eq!(DocumentEvent::replace(3, 4, 1).shift(), -3);
        assert_eq!(DocumentEvent::replace(3, 4, 1).old_end(), 7);
        assert_eq!(DocumentEvent::replace(3, 4, 1).new_end(), 4);
    }

    #[test]
    fn test_whole_text_flag() {
        let event = DocumentEvent::whole_text(10, 20);
        assert!(event.whole_text_replaced);
        assert_eq!(event.offset, 0);
        assert!(!DocumentEvent::insert(0, 1).whole_text_replaced);
    }
}
