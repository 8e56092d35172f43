use crate::codec::CodeUnit;
use std::fmt;

/// Returned when appending would exceed a [`FixedPath`]'s capacity
#[derive(Debug, PartialEq, Eq)]
pub struct CapacityError;

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("fixed path capacity exceeded")
    }
}

impl std::error::Error for CapacityError {}

/// A path buffer of at most `N` code units that never allocates, suitable for
/// use inside a signal handler.
///
/// The buffer always keeps one unit in reserve, so a nul terminator can be
/// appended with [`Self::as_nul_terminated`] for handing to libc.
pub struct FixedPath<U: CodeUnit, const N: usize> {
    units: [U; N],
    ind: usize,
}

impl<U: CodeUnit, const N: usize> FixedPath<U, N> {
    #[inline]
    pub fn new() -> Self {
        Self {
            units: [U::default(); N],
            ind: 0,
        }
    }

    pub fn from_slice(buf: &[U]) -> Option<Self> {
        let mut fp = Self::new();
        fp.extend_from_slice(buf).ok()?;
        Some(fp)
    }

    #[inline]
    pub fn clear(&mut self) {
        self.ind = 0;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ind
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ind == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[U] {
        &self.units[..self.ind]
    }

    #[inline]
    pub fn push(&mut self, unit: U) -> Result<(), CapacityError> {
        self.extend_from_slice(&[unit])
    }

    /// Appends `units`. On failure the contents are left untouched.
    pub fn extend_from_slice(&mut self, units: &[U]) -> Result<(), CapacityError> {
        if self.ind + units.len() + 1 > N {
            return Err(CapacityError);
        }

        self.units[self.ind..self.ind + units.len()].copy_from_slice(units);
        self.ind += units.len();
        Ok(())
    }

    pub fn extend_ascii(&mut self, ascii: &[u8]) -> Result<(), CapacityError> {
        if self.ind + ascii.len() + 1 > N {
            return Err(CapacityError);
        }

        for (unit, b) in self.units[self.ind..].iter_mut().zip(ascii) {
            *unit = U::from_ascii(*b);
        }
        self.ind += ascii.len();
        Ok(())
    }

    /// The contents followed by a nul unit
    #[inline]
    pub fn as_nul_terminated(&mut self) -> &[U] {
        self.units[self.ind] = U::default();
        &self.units[..=self.ind]
    }
}

impl<U: CodeUnit, const N: usize> Default for FixedPath<U, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U: CodeUnit, const N: usize> fmt::Debug for FixedPath<U, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}
