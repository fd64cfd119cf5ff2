use approx::assert_abs_diff_eq;
use candle_core::Device;
use matrix_util::dmatrix_util::*;
use matrix_util::tensor_util::*;
use matrix_util::traits::*;

#[test]
fn block_tridiag_layout() -> anyhow::Result<()> {
    let diag = vec![DMatrix::<f64>::identity(2, 2) * 3.0; 3];
    let lower = vec![DMatrix::from_row_slice(2, 2, &[1., 2., 3., 4.]); 2];

    let mm = DMatrix::<f64>::block_tridiag(&diag, &lower)?;
    assert_eq!(mm.shape(), (6, 6));
    assert_abs_diff_eq!(mm.clone(), mm.transpose());
    assert_abs_diff_eq!(mm.block(2, 1, 0), lower[0]);
    assert_abs_diff_eq!(mm.block(2, 0, 1), lower[0].transpose());
    assert_abs_diff_eq!(mm.block(2, 2, 0), DMatrix::<f64>::zeros(2, 2));

    assert!(DMatrix::<f64>::block_tridiag(&diag, &lower[..1]).is_err());
    Ok(())
}

#[test]
fn spd_helpers() -> anyhow::Result<()> {
    let xx = DMatrix::<f64>::rspd(5, 1.0);
    let bb = DVector::from_vec(vec![1., -1., 2., 0., 0.5]);

    let zz = solve_spd(&xx, &bb)?;
    assert_abs_diff_eq!(&xx * zz, bb, epsilon = 1e-9);
    assert_abs_diff_eq!(
        log_det_spd(&xx)?,
        xx.determinant().ln(),
        epsilon = 1e-9
    );

    let not_spd = DMatrix::<f64>::identity(2, 2) * -1.0;
    assert!(log_det_spd(&not_spd).is_err());
    Ok(())
}

#[test]
fn blocks_tensor_round_trip() -> anyhow::Result<()> {
    let blocks = (0..2)
        .map(|_| (0..3).map(|_| DMatrix::<f64>::rnorm(2, 2)).collect::<Vec<_>>())
        .collect::<Vec<_>>();

    let tensor = blocks_to_tensor(&blocks, &Device::Cpu)?;
    assert_eq!(tensor.dims(), &[2, 3, 2, 2]);

    let back = tensor_to_blocks(&tensor)?;
    assert_abs_diff_eq!(back[1][2], blocks[1][2]);

    let traj = vec![vec![DVector::from_vec(vec![1., 2.]), DVector::from_vec(vec![3., 4.])]];
    let tensor = vectors_to_tensor(&traj, &Device::Cpu)?;
    assert_eq!(tensor.dims(), &[1, 2, 2]);
    assert_eq!(stack_trajectory(&tensor_to_vectors(&tensor)?[0]).as_slice(), &[1., 2., 3., 4.]);
    Ok(())
}
