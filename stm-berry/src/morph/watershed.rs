//! 以扩展极小值为种子的分水岭.

use super::Connectivity;
use crate::Idx3d;
use binary_heap_plus::BinaryHeap;
use ndarray::{Array3, ArrayView3};
use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::collections::VecDeque;

/// 分水岭中 "坝" 的内部标记. 输出前会被替换为 0.
const DAM: u32 = u32::MAX;

/// h-极小值变换: 以 `f + h` 为标记, 在 `f` 之上做腐蚀重建.
///
/// 每个体素的结果为 "从任一体素 `q` 出发到达该体素的所有路径中,
/// `max(f(q) + h, 路径上 f 的最大值)` 的最小值". 以优先队列一次泛洪求得.
/// 只有 `domain` 为 `true` 的体素参与计算, 其余体素保持 `f` 不变.
pub fn h_minima(
    f: ArrayView3<f32>,
    domain: ArrayView3<bool>,
    h: f32,
    conn: Connectivity,
) -> Array3<f32> {
    let shape = f.dim();
    let mut rec = f.to_owned();
    let mut heap = BinaryHeap::new_by_key(|e: &(OrderedFloat<f32>, Idx3d)| Reverse(e.0));
    for (pos, v) in f.indexed_iter() {
        if domain[pos] {
            rec[pos] = *v + h;
            heap.push((OrderedFloat(*v + h), pos));
        }
    }
    let mut done = Array3::<bool>::default(shape);
    while let Some((OrderedFloat(level), pos)) = heap.pop() {
        if done[pos] {
            continue;
        }
        done[pos] = true;
        for n in conn.neighbours(pos, shape) {
            if !domain[n] || done[n] {
                continue;
            }
            let candidate = level.max(f[n]);
            if candidate < rec[n] {
                rec[n] = candidate;
                heap.push((OrderedFloat(candidate), n));
            }
        }
    }
    rec
}

/// 求 `g` 在 `domain` 内的区域极小值并逐个编号 (从 1 开始).
///
/// 区域极小值是值相等的连通平台, 且其所有邻居 (`domain` 内) 的值都严格更大.
/// 返回标签体和极小值个数.
pub fn regional_minima(
    g: ArrayView3<f32>,
    domain: ArrayView3<bool>,
    conn: Connectivity,
) -> (Array3<u32>, u32) {
    let shape = g.dim();
    let mut labels = Array3::<u32>::zeros(shape);
    let mut visited = Array3::<bool>::default(shape);
    let mut next = 0u32;
    let mut q = VecDeque::with_capacity(64);
    let mut plateau = Vec::with_capacity(64);

    for (start, _) in g.indexed_iter() {
        if !domain[start] || visited[start] {
            continue;
        }
        let level = g[start];
        let mut is_minimum = true;
        visited[start] = true;
        q.push_back(start);
        plateau.clear();
        while let Some(cur) = q.pop_front() {
            plateau.push(cur);
            for n in conn.neighbours(cur, shape) {
                if !domain[n] {
                    continue;
                }
                if g[n] < level {
                    is_minimum = false;
                } else if g[n] == level && !visited[n] {
                    visited[n] = true;
                    q.push_back(n);
                }
            }
        }
        if is_minimum {
            next += 1;
            for p in plateau.iter() {
                labels[*p] = next;
            }
        }
    }
    (labels, next)
}

/// 扩展极小值: 动态不低于 `dynamic` 的极小值区域, 编号从 1 开始.
pub fn extended_minima(
    f: ArrayView3<f32>,
    domain: ArrayView3<bool>,
    dynamic: f32,
    conn: Connectivity,
) -> (Array3<u32>, u32) {
    let rec = h_minima(f, domain, dynamic, conn);
    regional_minima(rec.view(), domain, conn)
}

/// 有标记的 Meyer 泛洪分水岭, 带分水岭坝.
///
/// `markers` 中非零体素为种子. 泛洪只在 `domain` 内进行, 按 `f` 的升序推进;
/// 同时邻接两个不同标签的体素成为坝 (输出为 0), 坝不再向外传播.
pub fn seeded_watershed(
    f: ArrayView3<f32>,
    markers: ArrayView3<u32>,
    domain: ArrayView3<bool>,
    conn: Connectivity,
) -> Array3<u32> {
    let shape = f.dim();
    let mut labels = markers.to_owned();
    let mut queued = labels.map(|l| *l != 0);
    let mut seq = 0u64;
    let mut heap =
        BinaryHeap::new_by_key(|e: &(OrderedFloat<f32>, u64, Idx3d)| Reverse((e.0, e.1)));

    let seeds: Vec<Idx3d> = labels
        .indexed_iter()
        .filter_map(|(pos, l)| (*l != 0).then_some(pos))
        .collect();
    for pos in seeds {
        for n in conn.neighbours(pos, shape) {
            if domain[n] && !queued[n] {
                queued[n] = true;
                heap.push((OrderedFloat(f[n]), seq, n));
                seq += 1;
            }
        }
    }

    while let Some((_, _, pos)) = heap.pop() {
        let mut owner = 0u32;
        let mut conflict = false;
        for n in conn.neighbours(pos, shape) {
            let l = labels[n];
            if l == 0 || l == DAM {
                continue;
            }
            if owner == 0 {
                owner = l;
            } else if owner != l {
                conflict = true;
                break;
            }
        }
        if conflict || owner == 0 {
            labels[pos] = DAM;
            continue;
        }
        labels[pos] = owner;
        for n in conn.neighbours(pos, shape) {
            if domain[n] && !queued[n] {
                queued[n] = true;
                heap.push((OrderedFloat(f[n]), seq, n));
                seq += 1;
            }
        }
    }

    labels.mapv_inplace(|l| if l == DAM { 0 } else { l });
    labels
}

/// 扩展极小值分水岭: 以 `dynamic` 求扩展极小值作为种子, 再在 `domain` 内泛洪.
///
/// 返回碎片标签体 (0 为背景或坝) 和碎片个数.
pub fn extended_minima_watershed(
    f: ArrayView3<f32>,
    domain: ArrayView3<bool>,
    dynamic: f32,
    conn: Connectivity,
) -> (Array3<u32>, u32) {
    let (markers, n) = extended_minima(f, domain, dynamic, conn);
    (seeded_watershed(f, markers.view(), domain, conn), n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    /// 一维 "W" 形剖面: 两个深谷中间隔着一个高度为 `ridge` 的山脊.
    fn w_profile(ridge: f32) -> Array3<f32> {
        let profile = [5.0, 0.0, 1.0, ridge, 1.0, 0.0, 5.0];
        Array3::from_shape_fn((1, 1, 7), |(_, _, w)| profile[w])
    }

    #[test]
    fn test_extended_minima_merges_shallow() {
        let f = w_profile(1.5);
        let domain = Array3::from_elem(f.raw_dim(), true);
        // 山脊只高出谷底 1.5, 动态为 2 时两个谷属于同一个扩展极小值平台.
        let (_, n) = extended_minima(f.view(), domain.view(), 2.0, Connectivity::Six);
        assert_eq!(n, 1);
        let (_, n) = extended_minima(f.view(), domain.view(), 1.0, Connectivity::Six);
        assert_eq!(n, 2);
    }

    #[test]
    fn test_watershed_dam() {
        let f = w_profile(3.0);
        let domain = Array3::from_elem(f.raw_dim(), true);
        let (labels, n) =
            extended_minima_watershed(f.view(), domain.view(), 2.0, Connectivity::Six);
        assert_eq!(n, 2);
        let row: Vec<u32> = labels.iter().copied().collect();
        assert_eq!(row[3], 0);
        assert_ne!(row[1], row[5]);
        assert_eq!(row[0], row[1]);
        assert_eq!(row[6], row[5]);
    }

    #[test]
    fn test_watershed_respects_domain() {
        let f = w_profile(3.0);
        let domain = Array3::from_shape_fn(f.raw_dim(), |(_, _, w)| w < 3);
        let (labels, n) =
            extended_minima_watershed(f.view(), domain.view(), 2.0, Connectivity::Six);
        assert_eq!(n, 1);
        assert!(labels.iter().skip(3).all(|l| *l == 0));
        assert!(labels.iter().take(3).all(|l| *l == 1));
    }
}
