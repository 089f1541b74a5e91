use crate::core;
use crate::geom::prim::Primitive;
use crate::geom::util;
use crate::render::Progress;

use log::debug;

/// Note: the implementation of a bounding-volume hierarchy in this file is taken from
/// PBRT, 3rd edition, section 4.3 (starting around page 256). Subtrees above a size threshold
/// are built in parallel, and builds can be cancelled through progress.

/// What a BVH leaf references: a primitive, optionally of a scene object, or a whole object
/// instance whose mesh carries its own BVH.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BvhItem {
    Prim {
        object: Option<usize>,
        prim: Primitive
    },
    Instance(usize),
}

#[derive(Clone, Copy, Debug)]
pub struct BvhReference {
    pub item: BvhItem,
    pub bbox: core::BBox,
    centroid: core::Vec
}

impl BvhReference {
    pub fn new(item: BvhItem, bbox: core::BBox) -> BvhReference {
        BvhReference {
            item: item,
            bbox: bbox,
            centroid: bbox.centroid()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BvhParams {
    pub max_leaf_size: usize,
    pub num_buckets: usize,
    /// Subtrees with at least this many references are built on the rayon pool.
    pub parallel_build_threshold: usize,
}

impl Default for BvhParams {
    fn default() -> BvhParams {
        BvhParams {
            max_leaf_size: 8,
            num_buckets: 12,
            parallel_build_threshold: 4096
        }
    }
}

#[derive(Clone, Copy)]
struct BucketInfo {
    count: usize,
    bbox: core::BBox
}

impl BucketInfo {
    pub fn empty() -> BucketInfo {
        BucketInfo {count: 0, bbox: core::BBox::empty()}
    }
}

enum BvhBuildNode {
    Leaf {
        bbox: core::BBox,
        first: usize,
        count: usize
    },
    Interior {
        bbox: core::BBox,
        axis: usize,
        children: Box<(BvhBuildNode, BvhBuildNode)>
    }
}

impl BvhBuildNode {
    fn bbox(&self) -> &core::BBox {
        match *self {
            BvhBuildNode::Leaf {ref bbox, ..} => bbox,
            BvhBuildNode::Interior {ref bbox, ..} => bbox,
        }
    }

    fn new_interior(axis: usize, c0: BvhBuildNode, c1: BvhBuildNode) -> BvhBuildNode {
        BvhBuildNode::Interior {
            bbox: c0.bbox().combine_with(c1.bbox()),
            axis: axis,
            children: Box::new((c0, c1))
        }
    }
}

/// Node of the flattened, depth-first BVH. Leaves reference `num_items` items starting at
/// `offset`; interior nodes have their first child right after them and the second child
/// at `offset`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BvhNode {
    pub bbox: core::BBox,
    pub offset: usize,
    pub num_items: usize,
    pub axis: usize
}

impl BvhNode {
    pub fn is_leaf(&self) -> bool {
        self.num_items > 0
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bvh {
    pub items: Vec<BvhItem>,
    pub nodes: Vec<BvhNode>
}

impl Bvh {
    fn bucket_of(centroid_bbox: &core::BBox, centroid: &core::Vec, dim: usize, num_buckets: usize)
        -> usize
    {
        let rel = centroid_bbox.relative_offset(centroid);
        core::clamp((num_buckets as f32 * rel[dim]) as usize, 0, num_buckets - 1)
    }

    /// Chooses where to split `refs`, reordering them in place. Returns `None` to make a leaf.
    fn choose_split(refs: &mut [BvhReference], bbox: &core::BBox, centroid_bbox: &core::BBox,
        dim: usize, params: &BvhParams) -> Option<usize>
    {
        let num_refs = refs.len();
        let equal_counts = |refs: &mut [BvhReference]| {
            let mid = num_refs / 2;
            util::nth_element(refs, mid, &|lhs: &BvhReference, rhs: &BvhReference| {
                lhs.centroid[dim] < rhs.centroid[dim]
            });
            mid
        };

        if num_refs <= 4 {
            // Partition into equally-sized subsets if too small to use SAH.
            return Some(equal_counts(refs));
        }

        // Use the surface-area heuristic.
        let num_buckets = params.num_buckets.max(2);
        let mut buckets = vec![BucketInfo::empty(); num_buckets];
        for r in refs.iter() {
            let b = Bvh::bucket_of(centroid_bbox, &r.centroid, dim, num_buckets);
            buckets[b].count += 1;
            buckets[b].bbox = buckets[b].bbox.combine_with(&r.bbox);
        }

        // Compute costs for splitting after each bucket.
        let area = bbox.surface_area().max(std::f32::MIN_POSITIVE);
        let mut cost = vec![0.0; num_buckets - 1];
        for i in 0..(num_buckets - 1) {
            let (left, right) = buckets.split_at(i + 1);
            let (b0, count0) = left.iter().fold((core::BBox::empty(), 0), |(b, c), bucket| {
                (b.combine_with(&bucket.bbox), c + bucket.count)
            });
            let (b1, count1) = right.iter().fold((core::BBox::empty(), 0), |(b, c), bucket| {
                (b.combine_with(&bucket.bbox), c + bucket.count)
            });
            cost[i] = 1.0 + (count0 as f32 * b0.surface_area()
                    + count1 as f32 * b1.surface_area()) / area;
        }

        // Find bucket to split at that minimizes SAH metric.
        let mut min_cost = cost[0];
        let mut min_cost_split_bucket = 0;
        for i in 1..(num_buckets - 1) {
            if cost[i] < min_cost {
                min_cost = cost[i];
                min_cost_split_bucket = i;
            }
        }

        // Either create leaf or split primitives at selected SAH bucket.
        // (Leaf might be cheaper.)
        let leaf_cost = num_refs as f32;
        if num_refs > params.max_leaf_size || min_cost < leaf_cost {
            let mid = util::partition(refs, |r| {
                Bvh::bucket_of(centroid_bbox, &r.centroid, dim, num_buckets)
                        <= min_cost_split_bucket
            });
            if mid == 0 || mid == num_refs {
                return Some(equal_counts(refs));
            }
            Some(mid)
        }
        else {
            None
        }
    }

    fn recurse_build(refs: &mut [BvhReference], first: usize, params: &BvhParams,
        progress: &dyn Progress) -> Option<BvhBuildNode>
    {
        let num_refs = refs.len();
        let parallel = num_refs >= params.parallel_build_threshold;
        if parallel && progress.get_cancel() {
            return None;
        }

        let bbox = refs.iter().fold(core::BBox::empty(), |b, r| b.combine_with(&r.bbox));
        let leaf = BvhBuildNode::Leaf {bbox: bbox, first: first, count: num_refs};
        if num_refs == 1 {
            return Some(leaf);
        }

        let centroid_bbox = refs.iter().fold(core::BBox::empty(), |b, r| b.union_with(&r.centroid));
        let dim = centroid_bbox.maximum_extent();
        let mid = if centroid_bbox.min[dim] == centroid_bbox.max[dim] {
            // Components overlay one another; only split to respect the leaf size.
            if num_refs <= params.max_leaf_size {
                return Some(leaf);
            }
            num_refs / 2
        }
        else {
            match Bvh::choose_split(refs, &bbox, &centroid_bbox, dim, params) {
                Some(mid) => mid,
                None => return Some(leaf)
            }
        };

        debug_assert!(mid > 0);
        debug_assert!(mid < num_refs);
        let (left, right) = refs.split_at_mut(mid);
        let (c0, c1) = if parallel {
            rayon::join(
                || Bvh::recurse_build(left, first, params, progress),
                || Bvh::recurse_build(right, first + mid, params, progress))
        }
        else {
            (Bvh::recurse_build(left, first, params, progress),
                    Bvh::recurse_build(right, first + mid, params, progress))
        };
        match (c0, c1) {
            (Some(c0), Some(c1)) => Some(BvhBuildNode::new_interior(dim, c0, c1)),
            _ => None
        }
    }

    fn flatten_tree(build_node: &BvhBuildNode, nodes: &mut Vec<BvhNode>) -> usize {
        let linear_node_index = nodes.len();
        match *build_node {
            BvhBuildNode::Leaf {bbox, first, count} => {
                nodes.push(BvhNode {bbox: bbox, offset: first, num_items: count, axis: 0});
            },
            BvhBuildNode::Interior {bbox, axis, ref children} => {
                nodes.push(BvhNode {bbox: bbox, offset: 0, num_items: 0, axis: axis});
                Bvh::flatten_tree(&children.0, nodes);
                let second_child_offset = Bvh::flatten_tree(&children.1, nodes);
                nodes[linear_node_index].offset = second_child_offset;
            }
        }
        linear_node_index
    }

    /// Builds a BVH over the references. Returns `None` if progress requested cancellation.
    pub fn build(mut refs: Vec<BvhReference>, params: &BvhParams, progress: &dyn Progress)
        -> Option<Bvh>
    {
        if progress.get_cancel() {
            return None;
        }
        if refs.is_empty() {
            return Some(Bvh::default());
        }

        let root = Bvh::recurse_build(&mut refs, 0, params, progress)?;

        // Compute representation of depth-first traversal of BVH tree.
        let mut nodes = Vec::with_capacity(2 * refs.len());
        Bvh::flatten_tree(&root, &mut nodes);
        debug!("built BVH over {} items with {} nodes", refs.len(), nodes.len());

        Some(Bvh {
            items: refs.iter().map(|r| r.item).collect(),
            nodes: nodes
        })
    }

    /// Recomputes node bounds for moved items without changing the tree's topology.
    pub fn refit(&mut self, bounds_of: impl Fn(&BvhItem) -> core::BBox) {
        for i in (0..self.nodes.len()).rev() {
            let node = self.nodes[i];
            let bbox = if node.is_leaf() {
                self.items[node.offset..(node.offset + node.num_items)].iter()
                        .fold(core::BBox::empty(), |b, item| b.combine_with(&bounds_of(item)))
            }
            else {
                self.nodes[i + 1].bbox.combine_with(&self.nodes[node.offset].bbox)
            };
            self.nodes[i].bbox = bbox;
        }
    }

    pub fn bounds(&self) -> core::BBox {
        match self.nodes.first() {
            Some(root) => root.bbox,
            None => core::BBox::empty()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::SimpleProgress;
    use rand::{Rng, SeedableRng};
    use rand::rngs::StdRng;

    fn random_refs(n: usize, seed: u64) -> Vec<BvhReference> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|i| {
            let p = core::Vec::new(rng.gen_range(-10.0..10.0), rng.gen_range(-10.0..10.0),
                    rng.gen_range(-10.0..10.0));
            let bbox = core::BBox::from_points(&p, &(p + core::Vec::splat(rng.gen_range(0.1..1.0))));
            BvhReference::new(BvhItem::Prim {object: None, prim: Primitive::Triangle(i)}, bbox)
        }).collect()
    }

    fn check_tree(bvh: &Bvh, refs: &[BvhReference], params: &BvhParams) {
        let mut seen = vec![false; refs.len()];
        for (i, node) in bvh.nodes.iter().enumerate() {
            if node.is_leaf() {
                assert!(node.num_items <= params.max_leaf_size);
                for item in &bvh.items[node.offset..(node.offset + node.num_items)] {
                    if let BvhItem::Prim {prim: Primitive::Triangle(t), ..} = *item {
                        assert!(!seen[t]);
                        seen[t] = true;
                        let b = refs[t].bbox;
                        assert_eq!(node.bbox.combine_with(&b), node.bbox);
                    }
                }
            }
            else {
                let children = node.bbox.combine_with(&bvh.nodes[i + 1].bbox)
                        .combine_with(&bvh.nodes[node.offset].bbox);
                assert_eq!(children, node.bbox);
            }
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn build_covers_every_item_once() {
        let refs = random_refs(500, 1);
        let params = BvhParams::default();
        let bvh = Bvh::build(refs.clone(), &params, &SimpleProgress::new()).unwrap();
        assert_eq!(bvh.items.len(), 500);
        check_tree(&bvh, &refs, &params);
    }

    #[test]
    fn parallel_build_matches_serial_build() {
        let refs = random_refs(2000, 2);
        let serial = BvhParams {parallel_build_threshold: usize::MAX, ..BvhParams::default()};
        let parallel = BvhParams {parallel_build_threshold: 16, ..BvhParams::default()};
        let progress = SimpleProgress::new();
        let a = Bvh::build(refs.clone(), &serial, &progress).unwrap();
        let b = Bvh::build(refs, &parallel, &progress).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn overlapping_items_respect_leaf_size() {
        let bbox = core::BBox::from_points(&core::Vec::zero(), &core::Vec::one());
        let refs: Vec<BvhReference> = (0..20).map(|i| {
            BvhReference::new(BvhItem::Prim {object: None, prim: Primitive::Triangle(i)}, bbox)
        }).collect();
        let params = BvhParams {max_leaf_size: 4, ..BvhParams::default()};
        let bvh = Bvh::build(refs.clone(), &params, &SimpleProgress::new()).unwrap();
        check_tree(&bvh, &refs, &params);
    }

    #[test]
    fn cancelled_build_returns_none() {
        let progress = SimpleProgress::new();
        progress.cancel();
        assert!(Bvh::build(random_refs(10, 3), &BvhParams::default(), &progress).is_none());
    }

    #[test]
    fn empty_build_has_no_nodes() {
        let bvh = Bvh::build(vec![], &BvhParams::default(), &SimpleProgress::new()).unwrap();
        assert!(bvh.is_empty());
        assert!(!bvh.bounds().is_valid());
    }

    #[test]
    fn refit_tracks_moved_items() {
        let mut refs = random_refs(100, 4);
        let params = BvhParams::default();
        let mut bvh = Bvh::build(refs.clone(), &params, &SimpleProgress::new()).unwrap();

        let offset = core::Vec::new(100.0, 0.0, 0.0);
        for r in refs.iter_mut() {
            r.bbox = core::BBox::from_points(&(r.bbox.min + offset), &(r.bbox.max + offset));
        }
        bvh.refit(|item| match *item {
            BvhItem::Prim {prim: Primitive::Triangle(t), ..} => refs[t].bbox,
            _ => core::BBox::empty()
        });
        check_tree(&bvh, &refs, &params);
        assert!(bvh.bounds().min.x > 80.0);
    }
}
