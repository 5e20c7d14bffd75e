use super::*;

#[test]
fn test_merge_dims() {
    assert_eq!(merge_dims(&[4, 3, 5, 7], 40), vec![4, 3, 35]);
    assert_eq!(merge_dims(&[4, 3, 5, 7], 2048), vec![4, 105]);
    assert_eq!(merge_dims(&[8, 1, 16], 2048), vec![8, 16]);
    assert_eq!(merge_dims(&[], 2048), vec![1]);
    assert_eq!(merge_dims(&[1, 1], 2048), vec![1]);
    // Axes already over the cap stay on their own.
    assert_eq!(merge_dims(&[2, 100, 3], 10), vec![2, 100, 3]);
}

#[test]
fn test_layout_without_merge_keeps_shape() {
    let layout = Layout::new(&[2, 3], false, false, 1);
    assert_eq!(layout.view_shape(), &[2, 3]);
    assert_eq!(layout.shards().len(), 1);
    assert_eq!(Layout::new(&[], false, false, 8).view_shape(), &[1]);
}

#[test]
fn test_split_enumerates_blocks_row_major() {
    let layout = Layout::new(&[5, 2], false, true, 2);
    let starts: Vec<Vec<usize>> = layout.shards().iter().map(|s| s.starts.clone()).collect();
    assert_eq!(starts, vec![vec![0, 0], vec![2, 0], vec![4, 0]]);
    assert_eq!(layout.shards()[2].lens, vec![1, 2]);
}

#[test]
fn test_gather_scatter_round_trip() {
    let x = Tensor::new((0..60).map(|v| v as f32).collect(), vec![3, 4, 5]).unwrap();
    for (merge, split, cap) in [(true, false, 20), (true, true, 3), (false, true, 2)] {
        let layout = Layout::new(x.shape(), merge, split, cap);
        let parts = layout.gather(&x).unwrap();
        assert_eq!(parts.iter().map(|p| p.numel()).sum::<usize>(), 60);
        assert_eq!(layout.scatter(parts).unwrap(), x);
    }
}

#[test]
fn test_scatter_rejects_wrong_part_count() {
    let layout = Layout::new(&[4], false, true, 2);
    assert!(layout.scatter(vec![Tensor::zeros(&[2])]).is_err());
}
