use crate::metadata::bitmap_len;

/// Fixed-length bit vector, LSB-first within each byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    bits: Vec<u8>,
    len: u64,
}

impl Bitmap {
    /// All-clear bitmap of `len` bits
    pub fn new(len: u64) -> Self {
        Self {
            bits: vec![0u8; bitmap_len(len)],
            len,
        }
    }

    /// Wrap stored bytes, truncating or zero extending them to `len` bits
    pub fn from_bytes(mut bits: Vec<u8>, len: u64) -> Self {
        bits.resize(bitmap_len(len), 0);
        let mut bitmap = Self { bits, len };
        bitmap.mask_tail();
        bitmap
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Out-of-range bits read as clear
    pub fn get(&self, index: u64) -> bool {
        if index >= self.len {
            return false;
        }
        let (byte, bit) = position(index);
        self.bits[byte] & (1 << bit) != 0
    }

    pub fn set(&mut self, index: u64) {
        if index < self.len {
            let (byte, bit) = position(index);
            self.bits[byte] |= 1 << bit;
        }
    }

    pub fn clear(&mut self, index: u64) {
        if index < self.len {
            let (byte, bit) = position(index);
            self.bits[byte] &= !(1 << bit);
        }
    }

    /// First clear bit at or after `start`
    pub fn first_clear_from(&self, start: u64) -> Option<u64> {
        let mut index = start;
        while index < self.len {
            let (byte, bit) = position(index);
            // Skip whole bytes that are fully allocated
            if bit == 0 && self.bits[byte] == 0xFF {
                index += 8;
                continue;
            }
            if !self.get(index) {
                return Some(index);
            }
            index += 1;
        }
        None
    }

    /// Start of the first run of `count` clear bits
    pub fn find_clear_run(&self, count: u64) -> Option<u64> {
        if count == 0 {
            return Some(0);
        }

        let mut run_start = 0;
        let mut run_len = 0;
        for index in 0..self.len {
            if self.get(index) {
                run_len = 0;
                run_start = index + 1;
            } else {
                run_len += 1;
                if run_len == count {
                    return Some(run_start);
                }
            }
        }
        None
    }

    pub fn count_ones(&self) -> u64 {
        self.bits.iter().map(|b| b.count_ones() as u64).sum()
    }

    /// Change the length; new bits are clear
    pub fn resize(&mut self, len: u64) {
        self.len = len;
        self.bits.resize(bitmap_len(len), 0);
        self.mask_tail();
    }

    fn mask_tail(&mut self) {
        let used = (self.len % 8) as u32;
        if used != 0
            && let Some(last) = self.bits.last_mut()
        {
            *last &= (1u8 << used) - 1;
        }
    }
}

fn position(index: u64) -> (usize, u32) {
    ((index / 8) as usize, (index % 8) as u32)
}
