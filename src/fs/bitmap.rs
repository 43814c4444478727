use bitvec::prelude::*;

/// occupancy of a fixed pool of slots, shared by the inode table and the block pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    bits: BitVec<u8, Lsb0>,
}

impl Bitmap {
    /// a bitmap of `len` free slots
    pub fn new(len: usize) -> Self {
        Bitmap {
            bits: bitvec![u8, Lsb0; 0; len],
        }
    }

    /// restore a bitmap from the bytes written by [Bitmap::as_raw_slice]
    pub fn from_raw(raw: &[u8], len: usize) -> Self {
        let mut bits = BitVec::<u8, Lsb0>::from_slice(raw);
        bits.resize(len, false);
        Bitmap { bits }
    }

    /// underlying bytes, one bit per slot
    pub fn as_raw_slice(&self) -> &[u8] {
        self.bits.as_raw_slice()
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// check if slot `i` is allocated
    pub fn is_occupied(&self, i: usize) -> bool {
        self.bits.get(i).as_deref().copied().unwrap_or(false)
    }

    /// calculate the number of allocated slots
    pub fn occupied_count(&self) -> usize {
        self.bits.count_ones()
    }

    /// calculate the number of free slots
    pub fn free_count(&self) -> usize {
        self.bits.count_zeros()
    }

    /// allocate the first free slot, lowest index first
    pub fn allocate(&mut self) -> Option<usize> {
        let index = self.bits.first_zero()?;
        self.bits.set(index, true);
        Some(index)
    }

    /// mark slot `i` allocated, used when rebuilding occupancy from records
    pub fn mark(&mut self, i: usize) {
        if let Some(mut bit) = self.bits.get_mut(i) {
            *bit = true;
        }
    }

    /// release slot `i`; releasing a slot that was never allocated is a caller bug
    pub fn release(&mut self, i: usize) {
        if let Some(mut bit) = self.bits.get_mut(i) {
            *bit = false;
        }
    }

    /// iterate allocated slot indices in ascending order
    pub fn occupied(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }
}
