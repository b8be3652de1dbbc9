//! Distance field generation
//!
//! Every walkable span gets its (chamfer) distance to the nearest area
//! boundary. The watershed partitioner grows regions from the maxima of this
//! field downwards.

use log::debug;

use crate::area::chamfer_pass;
use crate::compact_heightfield::CompactHeightfield;

/// Computes `chf.dist` and `chf.max_distance`
pub fn build_distance_field(chf: &mut CompactHeightfield) {
    let mut src = vec![u16::MAX; chf.span_count()];

    // Spans on an area edge start at zero
    for z in 0..chf.height {
        for x in 0..chf.width {
            for i in chf.cell_spans(x, z) {
                let area = chf.areas[i];
                let same_area = (0..4)
                    .filter_map(|dir| chf.neighbour(i, x, z, dir))
                    .filter(|&(ni, _, _)| chf.areas[ni] == area)
                    .count();
                if same_area != 4 {
                    src[i] = 0;
                }
            }
        }
    }

    chamfer_pass(chf, &mut src, |d| d.saturating_add(2), |d| d.saturating_add(3));

    let max_distance = src.iter().copied().max().unwrap_or(0);
    let blurred = box_blur(chf, 1, &src);

    chf.dist = blurred;
    chf.max_distance = max_distance;
    debug!(
        "Distance field built over {} spans, max distance {}",
        chf.span_count(),
        max_distance
    );
}

/// 3x3 box blur that leaves spans close to the boundary untouched
fn box_blur(chf: &CompactHeightfield, threshold: u16, src: &[u16]) -> Vec<u16> {
    let mut dst = vec![0u16; src.len()];
    let threshold = threshold * 2;

    for z in 0..chf.height {
        for x in 0..chf.width {
            for i in chf.cell_spans(x, z) {
                let cd = src[i];
                if cd <= threshold {
                    dst[i] = cd;
                    continue;
                }

                let mut d = cd as u32;
                for dir in 0..4 {
                    match chf.neighbour(i, x, z, dir) {
                        Some((ai, ax, az)) => {
                            d += src[ai] as u32;
                            let dir2 = (dir + 1) & 0x3;
                            d += match chf.neighbour(ai, ax, az, dir2) {
                                Some((a2, _, _)) => src[a2] as u32,
                                None => cd as u32,
                            };
                        }
                        None => d += cd as u32 * 2,
                    }
                }
                dst[i] = ((d + 5) / 9) as u16;
            }
        }
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::Heightfield;
    use crate::WALKABLE_AREA;
    use glam::Vec3;

    #[test]
    fn test_distance_field_peaks_in_the_middle() {
        let size = 9;
        let mut hf = Heightfield::new(size, size, Vec3::ZERO, Vec3::new(9.0, 5.0, 9.0), 1.0, 0.5).unwrap();
        for z in 0..size {
            for x in 0..size {
                hf.add_span(x, z, 0, 2, WALKABLE_AREA, 1);
            }
        }
        let mut chf = CompactHeightfield::build(4, 2, &hf);
        build_distance_field(&mut chf);

        let at = |x: i32, z: i32| chf.dist[chf.cell(x, z).index as usize];
        assert_eq!(at(0, 0), 0);
        assert_eq!(at(0, 4), 0);
        assert!(at(4, 4) > at(2, 4));
        assert!(at(2, 4) > at(1, 4));
        assert_eq!(chf.max_distance, 8);
    }
}
