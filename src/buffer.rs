use std::ops::{Deref, DerefMut};

use crate::{Result, StateError};

/// The sole unit of storage and transfer of an optimizer state: a flat,
/// contiguous run of doubles.
///
/// A buffer never changes length once created. Assigning one buffer to
/// another copies every element verbatim, including slots the caller does
/// not know about.
#[derive(Debug, Clone, PartialEq)]
pub struct StateBuffer {
    data: Box<[f64]>,
}

impl StateBuffer {
    /// Allocates a zero-filled buffer.
    ///
    /// # Arguments
    /// * `len` - The amount of doubles the buffer holds.
    ///
    /// # Returns
    /// A new buffer or `StateError::Allocation` if the memory couldn't be reserved.
    pub fn zeroed(len: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| StateError::Allocation { len })?;
        data.resize(len, 0.0);

        Ok(Self {
            data: data.into_boxed_slice(),
        })
    }

    /// Wraps an already materialized sequence of doubles.
    pub fn from_vec(data: Vec<f64>) -> Self {
        Self {
            data: data.into_boxed_slice(),
        }
    }

    /// Returns the amount of doubles in the buffer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data.into_vec()
    }

    /// Overwrites every element of this buffer with the elements of `other`.
    ///
    /// # Arguments
    /// * `other` - The buffer to copy from.
    ///
    /// # Returns
    /// `StateError::LengthMismatch` if both buffers differ in length, in which case
    /// nothing is written.
    pub fn copy_from(&mut self, other: &StateBuffer) -> Result<()> {
        if self.len() != other.len() {
            return Err(StateError::LengthMismatch {
                what: "assigned buffer",
                got: other.len(),
                expected: self.len(),
            });
        }

        self.data.copy_from_slice(&other.data);
        Ok(())
    }

    /// Encodes the buffer as raw IEEE-754 doubles in native byte order.
    pub fn to_bytes(&self) -> Vec<u8> {
        bytemuck::cast_slice(&self.data[..]).to_vec()
    }

    /// Decodes a buffer previously produced by `to_bytes`.
    ///
    /// # Arguments
    /// * `bytes` - The encoded doubles, the slice need not be aligned.
    ///
    /// # Returns
    /// `StateError::LengthMismatch` if `bytes` is not a whole number of doubles.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let width = size_of::<f64>();
        if bytes.len() % width != 0 {
            return Err(StateError::LengthMismatch {
                what: "encoded buffer",
                got: bytes.len(),
                expected: bytes.len() / width * width,
            });
        }

        let data: Vec<f64> = bytemuck::pod_collect_to_vec(bytes);
        Ok(Self::from_vec(data))
    }
}

impl Deref for StateBuffer {
    type Target = [f64];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for StateBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_buffer_is_all_zeros() {
        let buffer = StateBuffer::zeroed(7).unwrap();
        assert_eq!(buffer.len(), 7);
        assert!(buffer.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn copy_from_is_verbatim() {
        let src = StateBuffer::from_vec(vec![1.0, -2.5, f64::MAX, 0.125]);
        let mut dst = StateBuffer::zeroed(4).unwrap();

        dst.copy_from(&src).unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn copy_from_rejects_other_lengths() {
        let src = StateBuffer::from_vec(vec![1.0, 2.0]);
        let mut dst = StateBuffer::from_vec(vec![9.0, 9.0, 9.0]);

        assert!(dst.copy_from(&src).is_err());
        assert_eq!(dst.as_slice(), [9.0, 9.0, 9.0]);
    }

    #[test]
    fn bytes_survive_a_trip_through_storage() {
        let src = StateBuffer::from_vec(vec![3.0, 0.5, -1.0e-300]);
        let bytes = src.to_bytes();
        assert_eq!(bytes.len(), 24);

        let back = StateBuffer::from_bytes(&bytes[..]).unwrap();
        assert_eq!(back, src);
    }

    #[test]
    fn truncated_bytes_are_rejected() {
        let bytes = [0u8; 12];
        assert!(StateBuffer::from_bytes(&bytes).is_err());
    }
}
