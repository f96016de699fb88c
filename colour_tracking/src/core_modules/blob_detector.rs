// THEORY:
// The `blob_detector` is the spatial grouping layer of the tracker. It takes the
// cleaned binary mask and answers one question: which connected regions are
// there, and how big is each one?
//
// Key architectural principles & algorithm steps:
// 1.  **Border following**: `imageproc::contours::find_contours` traces every
//     border in raster order. Only top-level outer borders are kept; holes and
//     anything sitting inside a hole belong to the region that surrounds them.
// 2.  **Region growing**: each kept border is seeded at its first point and grown
//     with a breadth-first search over 8-connected foreground pixels. A shared
//     `visited` grid guarantees no pixel is claimed twice.
// 3.  **Hole filling**: the region's bounding box (padded by one pixel) is flooded
//     from the corner through 4-connected non-region pixels. Whatever the flood
//     cannot reach is enclosed by the border, so the enclosed area counts holes
//     the same way a filled polygon would.
// 4.  **Data aggregation**: the filled pixels are summed into image moments, which
//     give both the area used for ranking and the centroid used for tracking.
// 5.  **Stateless utility**: nothing is remembered between frames.

use std::collections::VecDeque;

use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};

use crate::core_modules::frame_buffer::{Contour, Point};
use crate::core_modules::moment::Moments;

/// One external contour and the moments of the area it encloses.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub contour: Contour,
    pub moments: Moments,
}

/// Finds every top-level region of `mask`, in raster encounter order.
pub fn find_regions(mask: &GrayImage) -> Vec<Region> {
    let (width, height) = mask.dimensions();
    let mut visited = vec![false; width as usize * height as usize];
    let mut regions = Vec::new();

    for border in find_contours::<u32>(mask) {
        if border.border_type != BorderType::Outer || border.parent.is_some() {
            continue;
        }
        let Some(seed) = border.points.first() else {
            continue;
        };
        let seed = Point::new(seed.x, seed.y);
        if visited[index(seed, width)] {
            continue;
        }

        let pixels = grow_region(mask, seed, &mut visited);
        let moments = fill_enclosed(&pixels);
        regions.push(Region {
            contour: Contour {
                points: border.points.iter().map(|p| Point::new(p.x, p.y)).collect(),
                enclosed_area: moments.m00 as u64,
            },
            moments,
        });
    }

    regions
}

/// Index of the largest region. Ties keep the earliest one.
pub fn largest(regions: &[Region]) -> Option<usize> {
    let mut best: Option<(usize, u64)> = None;
    for (i, region) in regions.iter().enumerate() {
        let area = region.contour.enclosed_area;
        if best.is_none_or(|(_, best_area)| area > best_area) {
            best = Some((i, area));
        }
    }
    best.map(|(i, _)| i)
}

#[inline]
fn index(point: Point, width: u32) -> usize {
    point.y as usize * width as usize + point.x as usize
}

/// Breadth-first search over 8-connected foreground pixels.
fn grow_region(mask: &GrayImage, seed: Point, visited: &mut [bool]) -> Vec<Point> {
    let (width, height) = mask.dimensions();
    let mut pixels = Vec::new();
    let mut queue = VecDeque::from([seed]);
    visited[index(seed, width)] = true;

    while let Some(current) = queue.pop_front() {
        pixels.push(current);

        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let nx = current.x as i64 + dx;
                let ny = current.y as i64 + dy;
                if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                    continue;
                }
                let neighbour = Point::new(nx as u32, ny as u32);
                let i = index(neighbour, width);
                if !visited[i] && mask.get_pixel(neighbour.x, neighbour.y)[0] > 0 {
                    visited[i] = true;
                    queue.push_back(neighbour);
                }
            }
        }
    }

    pixels
}

/// Moments of `pixels` plus every hole they enclose.
fn fill_enclosed(pixels: &[Point]) -> Moments {
    let Some(first) = pixels.first() else {
        return Moments::default();
    };
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in pixels {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }

    // Local grid with a one pixel frame of background all the way round.
    let grid_width = (max_x - min_x + 3) as usize;
    let grid_height = (max_y - min_y + 3) as usize;
    let mut inside = vec![false; grid_width * grid_height];
    for p in pixels {
        inside[(p.y - min_y + 1) as usize * grid_width + (p.x - min_x + 1) as usize] = true;
    }

    let mut outside = vec![false; grid_width * grid_height];
    let mut stack = vec![(0usize, 0usize)];
    outside[0] = true;
    while let Some((x, y)) = stack.pop() {
        let neighbours = [
            (x.wrapping_sub(1), y),
            (x + 1, y),
            (x, y.wrapping_sub(1)),
            (x, y + 1),
        ];
        for (nx, ny) in neighbours {
            if nx >= grid_width || ny >= grid_height {
                continue;
            }
            let i = ny * grid_width + nx;
            if !outside[i] && !inside[i] {
                outside[i] = true;
                stack.push((nx, ny));
            }
        }
    }

    let mut moments = Moments::default();
    for gy in 1..grid_height - 1 {
        for gx in 1..grid_width - 1 {
            if !outside[gy * grid_width + gx] {
                moments.accumulate(gx as u32 - 1 + min_x, gy as u32 - 1 + min_y);
            }
        }
    }
    moments
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn fill(mask: &mut GrayImage, left: u32, top: u32, width: u32, height: u32, value: u8) {
        for y in top..top + height {
            for x in left..left + width {
                mask.put_pixel(x, y, Luma([value]));
            }
        }
    }

    #[test]
    fn empty_mask_has_no_regions() {
        let mask = GrayImage::new(16, 16);
        assert!(find_regions(&mask).is_empty());
        assert_eq!(largest(&[]), None);
    }

    #[test]
    fn square_region_area_and_centroid() {
        let mut mask = GrayImage::new(200, 160);
        fill(&mut mask, 80, 60, 40, 40, 255);

        let regions = find_regions(&mask);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].contour.enclosed_area, 1600);
        assert_eq!(regions[0].moments.centroid(), Some((99.5, 79.5)));
        assert!(!regions[0].contour.points.is_empty());
    }

    #[test]
    fn diagonal_neighbours_join_one_region() {
        let mut mask = GrayImage::new(8, 8);
        mask.put_pixel(2, 2, Luma([255]));
        mask.put_pixel(3, 3, Luma([255]));
        mask.put_pixel(4, 4, Luma([255]));

        let regions = find_regions(&mask);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].contour.enclosed_area, 3);
    }

    #[test]
    fn holes_count_towards_enclosed_area() {
        let mut mask = GrayImage::new(30, 30);
        fill(&mut mask, 5, 5, 10, 10, 255);
        fill(&mut mask, 7, 7, 6, 6, 0);

        let regions = find_regions(&mask);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].contour.enclosed_area, 100);
    }

    #[test]
    fn islands_inside_holes_are_not_separate_regions() {
        let mut mask = GrayImage::new(30, 30);
        fill(&mut mask, 5, 5, 12, 12, 255);
        fill(&mut mask, 7, 7, 8, 8, 0);
        fill(&mut mask, 10, 10, 2, 2, 255);

        let regions = find_regions(&mask);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].contour.enclosed_area, 144);
    }

    #[test]
    fn largest_picks_biggest_and_first_on_ties() {
        let mut mask = GrayImage::new(100, 100);
        fill(&mut mask, 5, 5, 10, 10, 255);
        fill(&mut mask, 40, 40, 20, 20, 255);
        let regions = find_regions(&mask);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[largest(&regions).unwrap()].contour.enclosed_area, 400);

        let mut tied = GrayImage::new(100, 100);
        fill(&mut tied, 60, 5, 10, 10, 255);
        fill(&mut tied, 5, 50, 10, 10, 255);
        let regions = find_regions(&tied);
        let best = largest(&regions).unwrap();
        assert_eq!(best, 0);
        assert_eq!(regions[best].moments.centroid(), Some((64.5, 9.5)));
    }
}
