use approx::assert_relative_eq;
use ndgrad::convolution::{
    col2im, col2im_into, conv2d, effective_kernel_size, im2col, im2col_into, out_size, pooling2d,
    same_mode_padding,
};
use ndgrad::test_utils::assert_array_close;
use ndgrad::{DataType, Error, Im2ColConfig, NDArray, OpExecutor, PoolingType};

fn iota(shape: &[usize]) -> NDArray {
    let n: usize = shape.iter().product();
    NDArray::from_vec((0..n).map(|v| v as f64).collect(), shape, DataType::Double).unwrap()
}

/// The `kh x kw` window stored at output position `(oh, ow)`.
fn window(patches: &NDArray, b: usize, c: usize, oh: usize, ow: usize) -> Vec<Vec<f64>> {
    let (kh, kw) = (patches.shape()[2], patches.shape()[3]);
    (0..kh)
        .map(|i| {
            (0..kw)
                .map(|j| patches.get_f64(&[b, c, i, j, oh, ow]).unwrap())
                .collect()
        })
        .collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[test]
fn test_im2col_no_padding() -> Result<(), Error> {
    let image = iota(&[2, 2, 3, 3]);
    let patches = im2col(&image, &Im2ColConfig::new((2, 2)))?;
    assert_eq!(patches.shape(), &[2, 2, 2, 2, 2, 2]);

    assert_eq!(window(&patches, 0, 0, 0, 0), vec![vec![0.0, 1.0], vec![3.0, 4.0]]);
    assert_eq!(window(&patches, 0, 0, 0, 1), vec![vec![1.0, 2.0], vec![4.0, 5.0]]);
    assert_eq!(window(&patches, 0, 0, 1, 0), vec![vec![3.0, 4.0], vec![6.0, 7.0]]);
    assert_eq!(window(&patches, 0, 0, 1, 1), vec![vec![4.0, 5.0], vec![7.0, 8.0]]);
    // Second channel starts at 9, second example at 18.
    assert_eq!(window(&patches, 0, 1, 0, 0), vec![vec![9.0, 10.0], vec![12.0, 13.0]]);
    assert_eq!(window(&patches, 1, 0, 0, 0), vec![vec![18.0, 19.0], vec![21.0, 22.0]]);
    assert_eq!(window(&patches, 1, 1, 1, 1), vec![vec![31.0, 32.0], vec![34.0, 35.0]]);
    Ok(())
}

#[test]
fn test_im2col_dilation() -> Result<(), Error> {
    let image = iota(&[1, 1, 4, 4]);
    let cfg = Im2ColConfig::new((2, 2)).with_dilation((2, 2));
    let patches = im2col(&image, &cfg)?;
    assert_eq!(patches.shape(), &[1, 1, 2, 2, 2, 2]);
    assert_eq!(window(&patches, 0, 0, 0, 0), vec![vec![0.0, 2.0], vec![8.0, 10.0]]);
    assert_eq!(window(&patches, 0, 0, 0, 1), vec![vec![1.0, 3.0], vec![9.0, 11.0]]);
    assert_eq!(window(&patches, 0, 0, 1, 0), vec![vec![4.0, 6.0], vec![12.0, 14.0]]);
    assert_eq!(window(&patches, 0, 0, 1, 1), vec![vec![5.0, 7.0], vec![13.0, 15.0]]);
    Ok(())
}

#[test]
fn test_im2col_dilation_and_stride() -> Result<(), Error> {
    let image = iota(&[1, 1, 5, 5]);
    let cfg = Im2ColConfig::new((2, 2))
        .with_stride((2, 2))
        .with_dilation((2, 2));
    let patches = im2col(&image, &cfg)?;
    assert_eq!(patches.shape(), &[1, 1, 2, 2, 2, 2]);
    assert_eq!(window(&patches, 0, 0, 0, 0), vec![vec![0.0, 2.0], vec![10.0, 12.0]]);
    assert_eq!(window(&patches, 0, 0, 0, 1), vec![vec![2.0, 4.0], vec![12.0, 14.0]]);
    assert_eq!(window(&patches, 0, 0, 1, 0), vec![vec![10.0, 12.0], vec![20.0, 22.0]]);
    assert_eq!(window(&patches, 0, 0, 1, 1), vec![vec![12.0, 14.0], vec![22.0, 24.0]]);
    Ok(())
}

#[test]
fn test_same_mode_pads_trailing_edge() -> Result<(), Error> {
    assert_eq!(same_mode_padding(3, 2, 1, 1)?, (3, 0, 1));

    let image = iota(&[1, 1, 3, 3]);
    let cfg = Im2ColConfig::new((2, 2)).with_same_mode(true);
    let g = cfg.geometry(3, 3)?;
    assert_eq!((g.out_h, g.out_w, g.pad_top, g.pad_left), (3, 3, 0, 0));

    let patches = im2col(&image, &cfg)?;
    assert_eq!(patches.shape(), &[1, 1, 2, 2, 3, 3]);
    assert_eq!(window(&patches, 0, 0, 0, 0), vec![vec![0.0, 1.0], vec![3.0, 4.0]]);
    assert_eq!(window(&patches, 0, 0, 0, 2), vec![vec![2.0, 0.0], vec![5.0, 0.0]]);
    assert_eq!(window(&patches, 0, 0, 2, 0), vec![vec![6.0, 7.0], vec![0.0, 0.0]]);
    assert_eq!(window(&patches, 0, 0, 2, 2), vec![vec![8.0, 0.0], vec![0.0, 0.0]]);
    Ok(())
}

fn strided_same_mode_patches() -> Result<(NDArray, Im2ColConfig), Error> {
    let image = iota(&[1, 2, 3, 4]);
    let cfg = Im2ColConfig::new((3, 3))
        .with_stride((2, 2))
        .with_same_mode(true);
    Ok((im2col(&image, &cfg)?, cfg))
}

#[test]
fn test_same_mode_with_stride() -> Result<(), Error> {
    assert_eq!(same_mode_padding(3, 3, 2, 1)?, (2, 1, 1));
    assert_eq!(same_mode_padding(4, 3, 2, 1)?, (2, 0, 1));

    let (patches, _) = strided_same_mode_patches()?;
    assert_eq!(patches.shape(), &[1, 2, 3, 3, 2, 2]);
    let z = 0.0;
    assert_eq!(
        window(&patches, 0, 0, 0, 0),
        vec![vec![z, z, z], vec![0.0, 1.0, 2.0], vec![4.0, 5.0, 6.0]]
    );
    assert_eq!(
        window(&patches, 0, 0, 0, 1),
        vec![vec![z, z, z], vec![2.0, 3.0, z], vec![6.0, 7.0, z]]
    );
    assert_eq!(
        window(&patches, 0, 0, 1, 0),
        vec![vec![4.0, 5.0, 6.0], vec![8.0, 9.0, 10.0], vec![z, z, z]]
    );
    assert_eq!(
        window(&patches, 0, 0, 1, 1),
        vec![vec![6.0, 7.0, z], vec![10.0, 11.0, z], vec![z, z, z]]
    );
    assert_eq!(
        window(&patches, 0, 1, 0, 0),
        vec![vec![z, z, z], vec![12.0, 13.0, 14.0], vec![16.0, 17.0, 18.0]]
    );
    Ok(())
}

#[test]
fn test_col2im_accumulates_overlaps() -> Result<(), Error> {
    let (patches, _) = strided_same_mode_patches()?;
    let image = col2im(&patches, (2, 2), (1, 0), (3, 4), (1, 1))?;
    assert_eq!(image.shape(), &[1, 2, 3, 4]);
    assert_array_close(
        &image,
        &[
            0.0, 1.0, 4.0, 3.0, 8.0, 10.0, 24.0, 14.0, 8.0, 9.0, 20.0, 11.0, //
            12.0, 13.0, 28.0, 15.0, 32.0, 34.0, 72.0, 38.0, 20.0, 21.0, 44.0, 23.0,
        ],
        1e-12,
    );
    Ok(())
}

#[test]
fn test_im2col_into_permuted_destination() -> Result<(), Error> {
    let image = iota(&[2, 2, 3, 3]);
    let cfg = Im2ColConfig::new((2, 2));
    // Physical layout [b, c, oh, ow, kh, kw], viewed as [b, c, kh, kw, oh, ow].
    let raw = NDArray::zeros(&[2, 2, 2, 2, 2, 2], DataType::Double);
    let dest = raw.permute(&[0, 1, 4, 5, 2, 3])?;
    im2col_into(&image, &cfg, &dest)?;

    let fresh = im2col(&image, &cfg)?;
    assert_eq!(dest.to_vec_f64()?, fresh.to_vec_f64()?);
    // Window (1, 1) of the first plane, read in the physical layout.
    assert_eq!(raw.get_f64(&[0, 0, 1, 1, 0, 0])?, 4.0);
    assert_eq!(raw.get_f64(&[0, 0, 1, 1, 1, 1])?, 8.0);
    Ok(())
}

#[test]
fn test_im2col_into_rejects_wrong_shape() {
    let image = iota(&[1, 1, 3, 3]);
    let dest = NDArray::zeros(&[1, 1, 2, 2, 3, 3], DataType::Double);
    let err = im2col_into(&image, &Im2ColConfig::new((2, 2)), &dest).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
}

#[test]
fn test_col2im_into_overwrites_destination() -> Result<(), Error> {
    let patches = im2col(&iota(&[1, 1, 4, 4]), &Im2ColConfig::new((2, 2)).with_stride((2, 2)))?;
    let out = NDArray::full(&[1, 1, 4, 4], 100.0, DataType::Double);
    col2im_into(&patches, (2, 2), (0, 0), (1, 1), &out)?;
    assert_eq!(out.to_vec_f64()?, iota(&[1, 1, 4, 4]).to_vec_f64()?);
    Ok(())
}

fn check_adjoint(image_shape: &[usize], cfg: &Im2ColConfig) -> Result<(), Error> {
    let image = NDArray::random_normal(image_shape, 0.0, 1.0, DataType::Double)?;
    let patch_shape = cfg.patch_shape(image_shape)?;
    let p = NDArray::random_normal(&patch_shape, 0.0, 1.0, DataType::Double)?;
    let g = cfg.geometry(image_shape[2], image_shape[3])?;

    let lhs = dot(&im2col(&image, cfg)?.to_vec_f64()?, &p.to_vec_f64()?);
    let back = col2im(
        &p,
        cfg.stride,
        (g.pad_top, g.pad_left),
        (image_shape[2], image_shape[3]),
        cfg.dilation,
    )?;
    let rhs = dot(&image.to_vec_f64()?, &back.to_vec_f64()?);
    assert_relative_eq!(lhs, rhs, epsilon = 1e-9, max_relative = 1e-9);
    Ok(())
}

#[test]
fn test_adjoint_property() -> Result<(), Error> {
    check_adjoint(
        &[2, 3, 5, 5],
        &Im2ColConfig::new((3, 3)).with_stride((2, 2)).with_padding((1, 1)),
    )?;
    check_adjoint(&[1, 2, 6, 7], &Im2ColConfig::new((2, 3)).with_dilation((2, 1)))?;
    check_adjoint(
        &[1, 1, 5, 4],
        &Im2ColConfig::new((3, 3)).with_stride((2, 2)).with_same_mode(true),
    )
}

#[test]
fn test_round_trip_without_overlap_is_identity() -> Result<(), Error> {
    let image = NDArray::random_uniform(&[2, 3, 4, 6], -1.0, 1.0, DataType::Double)?;
    let cfg = Im2ColConfig::new((2, 3)).with_stride((2, 3));
    let back = col2im(&im2col(&image, &cfg)?, (2, 3), (0, 0), (4, 6), (1, 1))?;
    assert!(back.approx_eq(&image, 1e-12)?);
    Ok(())
}

#[test]
fn test_round_trip_with_overlap_counts_contributions() -> Result<(), Error> {
    let image = NDArray::ones(&[1, 1, 3, 3], DataType::Double);
    let back = col2im(&im2col(&image, &Im2ColConfig::new((2, 2)))?, (1, 1), (0, 0), (3, 3), (1, 1))?;
    assert_eq!(
        back.to_vec_f64()?,
        vec![1.0, 2.0, 1.0, 2.0, 4.0, 2.0, 1.0, 2.0, 1.0]
    );
    assert!(!back.approx_eq(&image, 1e-12)?);
    Ok(())
}

#[test]
fn test_output_size_helpers() -> Result<(), Error> {
    assert_eq!(out_size(2, 1, 1, 2, 1, false)?, 6);
    assert_eq!(out_size(5, 3, 2, 0, 1, false)?, 2);
    assert_eq!(out_size(6, 3, 2, 0, 1, true)?, 3);
    assert_eq!(effective_kernel_size(3, 2), 5);
    assert_eq!(effective_kernel_size(2, 1), 2);
    assert!(matches!(
        out_size(2, 3, 1, 0, 1, false),
        Err(Error::InvalidOperation(_))
    ));
    Ok(())
}

#[test]
fn test_kernel_larger_than_image_fails() {
    let image = iota(&[1, 1, 3, 3]);
    assert!(matches!(
        im2col(&image, &Im2ColConfig::new((4, 4))),
        Err(Error::InvalidOperation(_))
    ));
}

#[test]
fn test_int_args_round_trip() -> Result<(), Error> {
    let cfg = Im2ColConfig::new((3, 2))
        .with_stride((2, 1))
        .with_padding((1, 0))
        .with_dilation((1, 2))
        .with_out_size((4, 5));
    assert_eq!(Im2ColConfig::from_int_args(&cfg.to_int_args())?, cfg);
    assert!(Im2ColConfig::from_int_args(&[3, 3]).is_err());
    Ok(())
}

#[test]
fn test_pooling() -> Result<(), Error> {
    let executor = OpExecutor::default();
    let image = iota(&[1, 1, 4, 4]);
    let cfg = Im2ColConfig::new((2, 2)).with_stride((2, 2));

    let max = pooling2d(&executor, &image, &cfg, PoolingType::Max)?;
    assert_eq!(max.shape(), &[1, 1, 2, 2]);
    assert_eq!(max.to_vec_f64()?, vec![5.0, 7.0, 13.0, 15.0]);

    let avg = pooling2d(&executor, &image, &cfg, PoolingType::Avg)?;
    assert_array_close(&avg, &[2.5, 4.5, 10.5, 12.5], 1e-12);

    let pnorm = pooling2d(&executor, &image, &cfg, PoolingType::Pnorm(2))?;
    assert_relative_eq!(pnorm.get_f64(&[0, 0, 0, 0])?, 42f64.sqrt(), epsilon = 1e-12);
    Ok(())
}

#[test]
fn test_max_pooling_ignores_padding() -> Result<(), Error> {
    let executor = OpExecutor::default();
    let image = NDArray::full(&[1, 1, 2, 2], -3.0, DataType::Double);
    let cfg = Im2ColConfig::new((2, 2)).with_padding((1, 1)).with_stride((2, 2));
    let max = pooling2d(&executor, &image, &cfg, PoolingType::Max)?;
    assert_eq!(max.to_vec_f64()?, vec![-3.0; 4]);
    Ok(())
}

#[test]
fn test_conv2d() -> Result<(), Error> {
    let executor = OpExecutor::default();
    let input = iota(&[1, 1, 3, 3]);
    let weights = NDArray::ones(&[2, 1, 2, 2], DataType::Double);
    weights.set(&[1, 0, 0, 0], 0.0)?;
    let out = conv2d(&executor, &input, &weights, &Im2ColConfig::new((1, 1)))?;
    assert_eq!(out.shape(), &[1, 2, 2, 2]);
    assert_eq!(
        out.to_vec_f64()?,
        vec![8.0, 12.0, 20.0, 24.0, 8.0, 11.0, 17.0, 20.0]
    );
    Ok(())
}
