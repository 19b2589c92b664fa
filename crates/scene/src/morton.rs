use std::cmp::Ordering;

fn less_msb(a: u32, b: u32) -> bool {
    a < b && a < (a ^ b)
}

/// Z-order comparison of two quantized points without computing interleaved codes.
pub fn morton_less(a: [u32; 3], b: [u32; 3]) -> bool {
    let mut most_significant_dim = 0;
    for dim in 1..3 {
        if less_msb(
            a[most_significant_dim] ^ b[most_significant_dim],
            a[dim] ^ b[dim],
        ) {
            most_significant_dim = dim;
        }
    }
    a[most_significant_dim] < b[most_significant_dim]
}

fn morton_ordering(a: [u32; 3], b: [u32; 3]) -> Ordering {
    if morton_less(a, b) {
        Ordering::Less
    } else if morton_less(b, a) {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}

/// Sorts `entries` along the Z-order curve of their origins quantized into the common bounds.
///
/// Entries keep their order when every origin coincides.
pub fn sort_by_origin<T>(entries: &mut [(T, [f32; 3])]) {
    if entries.is_empty() {
        return;
    }
    let mut min = [f64::MAX; 3];
    let mut max = [f64::MIN; 3];
    for (_, origin) in entries.iter() {
        for axis in 0..3 {
            min[axis] = min[axis].min(origin[axis] as f64);
            max[axis] = max[axis].max(origin[axis] as f64);
        }
    }
    let extent = (0..3)
        .map(|axis| max[axis] - min[axis])
        .fold(0.0f64, f64::max);
    if extent <= f64::EPSILON {
        return;
    }
    let quantize = |origin: [f32; 3]| -> [u32; 3] {
        std::array::from_fn(|axis| {
            ((origin[axis] as f64 - min[axis]) / extent * u32::MAX as f64) as u32
        })
    };
    entries.sort_by(|a, b| morton_ordering(quantize(a.1), quantize(b.1)));
}
