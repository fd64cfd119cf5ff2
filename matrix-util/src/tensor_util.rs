use crate::traits::*;
use candle_core::{DType, Device, Tensor};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

impl ConvertMatOps for DMatrix<f64> {
    type Mat = Self;
    type Scalar = f64;

    fn from_tensor(tensor: &Tensor) -> anyhow::Result<Self::Mat> {
        let (nrow, ncol) = tensor.dims2()?;
        let data = tensor
            .to_device(&Device::Cpu)?
            .to_dtype(DType::F64)?
            .flatten_all()?
            .to_vec1::<f64>()?;
        Ok(DMatrix::from_row_slice(nrow, ncol, &data))
    }

    fn to_tensor(&self, dev: &Device) -> anyhow::Result<Tensor> {
        // nalgebra is column-major; tensors are row-major
        let data = self.transpose().as_slice().to_vec();
        Ok(Tensor::from_vec(data, (self.nrows(), self.ncols()), dev)?)
    }
}

/// Stack `B x T` square blocks into a `[B, T, n, n]` tensor
///
/// * `blocks` - `blocks[b][t]` is the `n x n` block at batch `b`, step `t`
/// * `dev` - target device
pub fn blocks_to_tensor(blocks: &[Vec<DMatrix<f64>>], dev: &Device) -> anyhow::Result<Tensor> {
    let nb = blocks.len();
    let tt = blocks.first().map(|x| x.len()).unwrap_or(0);
    let n = blocks
        .first()
        .and_then(|x| x.first())
        .map(|x| x.nrows())
        .unwrap_or(0);

    if nb == 0 || tt == 0 || n == 0 {
        anyhow::bail!("empty block sequence");
    }

    let mut data = Vec::with_capacity(nb * tt * n * n);
    for seq in blocks {
        if seq.len() != tt {
            anyhow::bail!("ragged block sequence: {} vs {}", seq.len(), tt);
        }
        for blk in seq {
            if blk.nrows() != n || blk.ncols() != n {
                anyhow::bail!("all blocks must be {} x {}", n, n);
            }
            data.extend(blk.transpose().iter().copied());
        }
    }
    Ok(Tensor::from_vec(data, (nb, tt, n, n), dev)?)
}

/// Read a `[B, T, n, m]` tensor back into `B x T` matrices
pub fn tensor_to_blocks(tensor: &Tensor) -> anyhow::Result<Vec<Vec<DMatrix<f64>>>> {
    let (nb, tt, n, m) = tensor.dims4()?;
    let data = tensor
        .to_device(&Device::Cpu)?
        .to_dtype(DType::F64)?
        .flatten_all()?
        .to_vec1::<f64>()?;

    let stride = n * m;
    Ok((0..nb)
        .into_par_iter()
        .map(|b| {
            (0..tt)
                .map(|t| {
                    let lb = (b * tt + t) * stride;
                    DMatrix::from_row_slice(n, m, &data[lb..(lb + stride)])
                })
                .collect()
        })
        .collect())
}

/// Stack `B x T` vectors into a `[B, T, n]` tensor
pub fn vectors_to_tensor(vectors: &[Vec<DVector<f64>>], dev: &Device) -> anyhow::Result<Tensor> {
    let nb = vectors.len();
    let tt = vectors.first().map(|x| x.len()).unwrap_or(0);
    let n = vectors
        .first()
        .and_then(|x| x.first())
        .map(|x| x.len())
        .unwrap_or(0);

    if nb == 0 || tt == 0 || n == 0 {
        anyhow::bail!("empty vector sequence");
    }

    let mut data = Vec::with_capacity(nb * tt * n);
    for seq in vectors {
        if seq.len() != tt || seq.iter().any(|x| x.len() != n) {
            anyhow::bail!("ragged vector sequence");
        }
        for x in seq {
            data.extend(x.iter().copied());
        }
    }
    Ok(Tensor::from_vec(data, (nb, tt, n), dev)?)
}

/// Read a `[B, T, n]` tensor back into `B x T` vectors
pub fn tensor_to_vectors(tensor: &Tensor) -> anyhow::Result<Vec<Vec<DVector<f64>>>> {
    let (nb, tt, n) = tensor.dims3()?;
    let data = tensor
        .to_device(&Device::Cpu)?
        .to_dtype(DType::F64)?
        .flatten_all()?
        .to_vec1::<f64>()?;

    Ok((0..nb)
        .into_par_iter()
        .map(|b| {
            (0..tt)
                .map(|t| {
                    let lb = (b * tt + t) * n;
                    DVector::from_column_slice(&data[lb..(lb + n)])
                })
                .collect()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dmatrix_tensor_layout() -> anyhow::Result<()> {
        let xx = DMatrix::from_row_slice(2, 3, &[1., 2., 3., 4., 5., 6.]);
        let tt = xx.to_tensor(&Device::Cpu)?;
        let rows: Vec<Vec<f64>> = tt.to_vec2()?;
        assert_eq!(rows, vec![vec![1., 2., 3.], vec![4., 5., 6.]]);

        let yy = DMatrix::<f64>::from_tensor(&tt)?;
        assert_eq!(xx, yy);
        Ok(())
    }

    #[test]
    fn test_blocks_layout() -> anyhow::Result<()> {
        let blk = DMatrix::from_row_slice(2, 2, &[1., 2., 3., 4.]);
        let blocks = vec![vec![blk.clone(), blk.scale(2.0)]];
        let tt = blocks_to_tensor(&blocks, &Device::Cpu)?;
        assert_eq!(tt.dims(), &[1, 2, 2, 2]);

        let row: Vec<f64> = tt.get(0)?.get(1)?.get(0)?.to_vec1()?;
        assert_eq!(row, vec![2., 4.]);

        let back = tensor_to_blocks(&tt)?;
        assert_eq!(back[0][1], blk.scale(2.0));
        Ok(())
    }
}
