use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Layout {
    shape: Vec<usize>,
    strides: Vec<usize>,
}

impl Layout {
    pub fn new(shape: &[usize], strides: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            strides: strides.to_vec(),
        }
    }

    pub fn from_shape(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            strides: Self::compute_strides(shape),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }
    pub fn dim_size(&self, dim: usize) -> Option<usize> {
        self.shape.get(dim).copied()
    }
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn is_contiguous(&self) -> bool {
        self.strides == Self::compute_strides(&self.shape)
    }

    pub fn view(&mut self, new_shape: &[usize]) -> Result<()> {
        let old_size = self.size();
        let new_size = new_shape.iter().product();

        if old_size != new_size {
            return Err(Error::IncompatibleShape(format!(
                "Cannot reshape layout of size {} to size {}",
                old_size, new_size
            )));
        }

        self.shape = new_shape.to_vec();
        self.strides = Self::compute_strides(new_shape);

        Ok(())
    }

    // helper

    pub fn compute_strides(shape: &[usize]) -> Vec<usize> {
        // Handle scalar case (empty shape)
        if shape.is_empty() {
            return vec![];
        }

        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len() - 1).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }

    pub fn compute_size(shape: &[usize]) -> usize {
        shape.iter().product()
    }

    pub fn can_broadcast_to(&self, target: &[usize]) -> bool {
        if self.shape.len() > target.len() {
            return false;
        }
        let rank_diff = target.len() - self.shape.len();
        self.shape
            .iter()
            .zip(&target[rank_diff..])
            .all(|(&a, &b)| a == b || a == 1)
    }

    /// Numpy-style broadcast of two shapes.
    pub fn broadcast_shape(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
        let ndim = lhs.len().max(rhs.len());
        let mut out = vec![0; ndim];

        for i in 0..ndim {
            let a = if i < ndim - lhs.len() { 1 } else { lhs[i - (ndim - lhs.len())] };
            let b = if i < ndim - rhs.len() { 1 } else { rhs[i - (ndim - rhs.len())] };
            out[i] = match (a, b) {
                (a, b) if a == b => a,
                (1, b) => b,
                (a, 1) => a,
                _ => {
                    return Err(Error::IncompatibleShape(format!(
                        "Cannot broadcast shapes {:?} and {:?}",
                        lhs, rhs
                    )))
                },
            };
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_are_row_major() {
        let layout = Layout::from_shape(&[2, 3, 4]);
        assert_eq!(layout.strides(), &[12, 4, 1]);
        assert_eq!(layout.size(), 24);
        assert!(layout.is_contiguous());
        assert!(Layout::from_shape(&[]).strides().is_empty());
    }

    #[test]
    fn broadcast_shapes() {
        assert_eq!(Layout::broadcast_shape(&[5, 10], &[]).unwrap(), vec![5, 10]);
        assert_eq!(Layout::broadcast_shape(&[3, 1], &[1, 4]).unwrap(), vec![3, 4]);
        assert_eq!(Layout::broadcast_shape(&[10], &[5, 10]).unwrap(), vec![5, 10]);
        assert!(Layout::broadcast_shape(&[3], &[4]).is_err());
    }

    #[test]
    fn view_rejects_size_change() {
        let mut layout = Layout::from_shape(&[2, 3]);
        assert!(layout.view(&[3, 2]).is_ok());
        assert!(layout.view(&[4, 2]).is_err());
    }
}
