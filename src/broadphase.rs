//! Broad-Phase (Dynamic AABB Tree)
//!
//! A self-balancing binary tree of fat AABBs producing candidate overlap
//! pairs for the contact manager. Supports O(log n) insert, remove and
//! move, plus a `touch` operation that forces pair re-evaluation without
//! movement (used when filters or sensor/active state change).
//!
//! # Features
//!
//! - **Fat AABBs**: stored boxes carry a margin plus a velocity-
//!   proportional extension so slow movement rarely re-inserts
//! - **Tree rotations**: AVL-style balancing keeps queries O(log n)
//! - **Moved-proxy buffer**: pairs are only recomputed for proxies that
//!   moved or were touched since the last step
//! - **Pair dedup contract**: no pair is reported twice in one update
//!   unless a proxy was removed and re-touched in between

use crate::math::{Aabb, Vec2};

/// Null node sentinel
pub const NULL_NODE: u32 = u32::MAX;

/// Margin added to stored AABBs in each direction.
const FAT_MARGIN: f32 = 0.1;

/// How far the stored AABB is extended along the displacement vector.
const DISPLACEMENT_MULTIPLIER: f32 = 2.0;

/// What a leaf proxy points back at: a fixture child on a body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProxyTarget {
    /// Body slot index in the world arena
    pub body: u32,
    /// Fixture index within the body
    pub fixture: u16,
    /// Shape child index within the fixture
    pub child: u32,
}

impl ProxyTarget {
    const NONE: Self = Self {
        body: u32::MAX,
        fixture: u16::MAX,
        child: u32::MAX,
    };
}

/// A node in the dynamic AABB tree
#[derive(Clone, Debug)]
struct TreeNode {
    /// Fat AABB (enlarged for movement prediction)
    aabb: Aabb,
    parent: u32,
    left: u32,
    right: u32,
    /// Height (0 for leaf, -1 for freed)
    height: i32,
    target: ProxyTarget,
    is_leaf: bool,
    /// Set while the proxy sits in the moved buffer
    moved: bool,
}

impl TreeNode {
    fn new_internal() -> Self {
        Self {
            aabb: Aabb::new(Vec2::ZERO, Vec2::ZERO),
            parent: NULL_NODE,
            left: NULL_NODE,
            right: NULL_NODE,
            height: 0,
            target: ProxyTarget::NONE,
            is_leaf: false,
            moved: false,
        }
    }
}

/// Dynamic AABB tree broad-phase over fixture proxies.
pub struct BroadPhase {
    nodes: Vec<TreeNode>,
    free_list: Vec<u32>,
    root: u32,
    /// Proxies moved or touched since the last `update_pairs`
    moved: Vec<u32>,
}

impl BroadPhase {
    /// Create a new empty broad-phase.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free_list: Vec::new(),
            root: NULL_NODE,
            moved: Vec::new(),
        }
    }

    /// Insert a proxy, returns its ID. The new proxy is marked moved so the
    /// next pair update sees it.
    pub fn create_proxy(&mut self, aabb: Aabb, target: ProxyTarget) -> u32 {
        let node_id = self.alloc_node();
        let node = &mut self.nodes[node_id as usize];
        node.aabb = aabb.extended(FAT_MARGIN);
        node.target = target;
        node.height = 0;
        node.is_leaf = true;
        node.moved = true;
        self.insert_leaf(node_id);
        self.moved.push(node_id);
        node_id
    }

    /// Remove a proxy by its ID.
    pub fn destroy_proxy(&mut self, proxy_id: u32) {
        if proxy_id as usize >= self.nodes.len() || !self.nodes[proxy_id as usize].is_leaf {
            return;
        }
        self.remove_leaf(proxy_id);
        self.free_node(proxy_id);
    }

    /// Move a proxy. The stored AABB is enlarged by the margin and extended
    /// along `displacement` to reduce churn. Returns true if the proxy was
    /// re-inserted (left its fat bounds).
    pub fn move_proxy(&mut self, proxy_id: u32, aabb: Aabb, displacement: Vec2) -> bool {
        if proxy_id as usize >= self.nodes.len() || !self.nodes[proxy_id as usize].is_leaf {
            return false;
        }

        let mut fat = aabb.extended(FAT_MARGIN);
        let d = DISPLACEMENT_MULTIPLIER * displacement;
        if d.x < 0.0 {
            fat.min.x += d.x;
        } else {
            fat.max.x += d.x;
        }
        if d.y < 0.0 {
            fat.min.y += d.y;
        } else {
            fat.max.y += d.y;
        }

        let reinsert = !self.nodes[proxy_id as usize].aabb.contains(&aabb);
        if reinsert {
            self.remove_leaf(proxy_id);
            self.nodes[proxy_id as usize].aabb = fat;
            self.insert_leaf(proxy_id);
        }
        self.buffer_move(proxy_id);
        reinsert
    }

    /// Force re-evaluation of a proxy's overlap pairs without movement.
    pub fn touch_proxy(&mut self, proxy_id: u32) {
        if proxy_id as usize >= self.nodes.len() || !self.nodes[proxy_id as usize].is_leaf {
            return;
        }
        self.buffer_move(proxy_id);
    }

    fn buffer_move(&mut self, proxy_id: u32) {
        if !self.nodes[proxy_id as usize].moved {
            self.nodes[proxy_id as usize].moved = true;
            self.moved.push(proxy_id);
        }
    }

    /// Target data for a proxy.
    #[inline]
    #[must_use]
    pub fn target(&self, proxy_id: u32) -> ProxyTarget {
        self.nodes[proxy_id as usize].target
    }

    /// Fat AABB stored for a proxy.
    #[inline]
    #[must_use]
    pub fn fat_aabb(&self, proxy_id: u32) -> Aabb {
        self.nodes[proxy_id as usize].aabb
    }

    /// Whether two proxies' fat AABBs overlap.
    #[inline]
    #[must_use]
    pub fn test_overlap(&self, a: u32, b: u32) -> bool {
        self.nodes[a as usize]
            .aabb
            .intersects(&self.nodes[b as usize].aabb)
    }

    /// Number of active proxies (leaf nodes).
    #[must_use]
    pub fn proxy_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf).count()
    }

    /// Tree height.
    #[must_use]
    pub fn height(&self) -> i32 {
        if self.root == NULL_NODE {
            0
        } else {
            self.nodes[self.root as usize].height
        }
    }

    /// Query all proxies overlapping the given AABB. The callback returns
    /// false to stop early.
    pub fn query<F: FnMut(u32) -> bool>(&self, aabb: &Aabb, mut callback: F) {
        if self.root == NULL_NODE {
            return;
        }
        let mut stack = Vec::with_capacity(64);
        stack.push(self.root);
        while let Some(node_id) = stack.pop() {
            if node_id == NULL_NODE {
                continue;
            }
            let node = &self.nodes[node_id as usize];
            if !node.aabb.intersects(aabb) {
                continue;
            }
            if node.is_leaf {
                if !callback(node_id) {
                    return;
                }
            } else {
                stack.push(node.left);
                stack.push(node.right);
            }
        }
    }

    /// Produce the deduplicated candidate pairs created by proxies moved or
    /// touched since the last call, then clear the moved buffer.
    ///
    /// Pairs are reported as `(proxy_a, target_a, proxy_b, target_b)` with
    /// `proxy_a < proxy_b`, in sorted order, each at most once.
    pub fn update_pairs<F: FnMut(u32, ProxyTarget, u32, ProxyTarget)>(&mut self, mut callback: F) {
        let mut pairs: Vec<(u32, u32)> = Vec::new();

        let moved = core::mem::take(&mut self.moved);
        for &proxy_id in &moved {
            if proxy_id as usize >= self.nodes.len() || !self.nodes[proxy_id as usize].is_leaf {
                continue; // destroyed while buffered
            }
            let fat = self.nodes[proxy_id as usize].aabb;
            self.query(&fat, |other| {
                if other != proxy_id {
                    let pair = if proxy_id < other {
                        (proxy_id, other)
                    } else {
                        (other, proxy_id)
                    };
                    pairs.push(pair);
                }
                true
            });
        }

        for &proxy_id in &moved {
            if (proxy_id as usize) < self.nodes.len() {
                self.nodes[proxy_id as usize].moved = false;
            }
        }

        pairs.sort_unstable();
        pairs.dedup();
        for (a, b) in pairs {
            callback(a, self.target(a), b, self.target(b));
        }
    }

    /// Walk the tree along a segment, invoking the callback for each leaf
    /// whose fat AABB the clipped segment touches.
    ///
    /// The callback returns the new maximum fraction: 0 terminates the
    /// walk, a positive value clips the remaining search.
    pub fn ray_cast<F: FnMut(u32, f32) -> f32>(
        &self,
        p1: Vec2,
        p2: Vec2,
        mut max_fraction: f32,
        mut callback: F,
    ) {
        if self.root == NULL_NODE {
            return;
        }
        let mut stack = Vec::with_capacity(64);
        stack.push(self.root);
        while let Some(node_id) = stack.pop() {
            if node_id == NULL_NODE {
                continue;
            }
            let node = &self.nodes[node_id as usize];
            if !node.aabb.intersects_segment(p1, p2, max_fraction) {
                continue;
            }
            if node.is_leaf {
                let value = callback(node_id, max_fraction);
                if value == 0.0 {
                    return;
                }
                if value > 0.0 {
                    max_fraction = value;
                }
            } else {
                stack.push(node.left);
                stack.push(node.right);
            }
        }
    }

    // =========== Internal methods ===========

    fn alloc_node(&mut self) -> u32 {
        if let Some(id) = self.free_list.pop() {
            self.nodes[id as usize] = TreeNode::new_internal();
            id
        } else {
            let id = self.nodes.len() as u32;
            self.nodes.push(TreeNode::new_internal());
            id
        }
    }

    fn free_node(&mut self, node_id: u32) {
        let node = &mut self.nodes[node_id as usize];
        node.height = -1;
        node.is_leaf = false;
        node.moved = false;
        node.target = ProxyTarget::NONE;
        node.parent = NULL_NODE;
        node.left = NULL_NODE;
        node.right = NULL_NODE;
        self.free_list.push(node_id);
    }

    fn insert_leaf(&mut self, leaf: u32) {
        if self.root == NULL_NODE {
            self.root = leaf;
            self.nodes[leaf as usize].parent = NULL_NODE;
            return;
        }

        // Find the best sibling by the surface-area heuristic (perimeter in 2D)
        let leaf_aabb = self.nodes[leaf as usize].aabb;
        let mut sibling = self.root;
        while !self.nodes[sibling as usize].is_leaf {
            let left = self.nodes[sibling as usize].left;
            let right = self.nodes[sibling as usize].right;

            let area = self.nodes[sibling as usize].aabb.perimeter();
            let combined_area = leaf_aabb.union(&self.nodes[sibling as usize].aabb).perimeter();

            let cost = 2.0 * combined_area;
            let inheritance_cost = 2.0 * (combined_area - area);

            let cost_left = self.child_insertion_cost(left, &leaf_aabb, inheritance_cost);
            let cost_right = self.child_insertion_cost(right, &leaf_aabb, inheritance_cost);

            if cost < cost_left && cost < cost_right {
                break;
            }
            sibling = if cost_left < cost_right { left } else { right };
        }

        // Create new parent
        let old_parent = self.nodes[sibling as usize].parent;
        let new_parent = self.alloc_node();
        self.nodes[new_parent as usize].parent = old_parent;
        self.nodes[new_parent as usize].aabb = leaf_aabb.union(&self.nodes[sibling as usize].aabb);
        self.nodes[new_parent as usize].height = self.nodes[sibling as usize].height + 1;

        if old_parent != NULL_NODE {
            if self.nodes[old_parent as usize].left == sibling {
                self.nodes[old_parent as usize].left = new_parent;
            } else {
                self.nodes[old_parent as usize].right = new_parent;
            }
        } else {
            self.root = new_parent;
        }

        self.nodes[new_parent as usize].left = sibling;
        self.nodes[new_parent as usize].right = leaf;
        self.nodes[sibling as usize].parent = new_parent;
        self.nodes[leaf as usize].parent = new_parent;

        self.fix_upwards(new_parent);
    }

    fn child_insertion_cost(&self, child: u32, leaf_aabb: &Aabb, inheritance: f32) -> f32 {
        let combined = leaf_aabb.union(&self.nodes[child as usize].aabb);
        if self.nodes[child as usize].is_leaf {
            combined.perimeter() + inheritance
        } else {
            let old_area = self.nodes[child as usize].aabb.perimeter();
            (combined.perimeter() - old_area) + inheritance
        }
    }

    fn remove_leaf(&mut self, leaf: u32) {
        if leaf == self.root {
            self.root = NULL_NODE;
            return;
        }

        let parent = self.nodes[leaf as usize].parent;
        let grand_parent = self.nodes[parent as usize].parent;
        let sibling = if self.nodes[parent as usize].left == leaf {
            self.nodes[parent as usize].right
        } else {
            self.nodes[parent as usize].left
        };

        if grand_parent != NULL_NODE {
            if self.nodes[grand_parent as usize].left == parent {
                self.nodes[grand_parent as usize].left = sibling;
            } else {
                self.nodes[grand_parent as usize].right = sibling;
            }
            self.nodes[sibling as usize].parent = grand_parent;
            self.free_node(parent);
            self.fix_upwards(grand_parent);
        } else {
            self.root = sibling;
            self.nodes[sibling as usize].parent = NULL_NODE;
            self.free_node(parent);
        }
    }

    fn fix_upwards(&mut self, start: u32) {
        let mut node_id = start;
        while node_id != NULL_NODE {
            node_id = self.balance(node_id);

            let left = self.nodes[node_id as usize].left;
            let right = self.nodes[node_id as usize].right;
            if left != NULL_NODE && right != NULL_NODE {
                let lh = self.nodes[left as usize].height;
                let rh = self.nodes[right as usize].height;
                self.nodes[node_id as usize].height = 1 + lh.max(rh);
                self.nodes[node_id as usize].aabb = self.nodes[left as usize]
                    .aabb
                    .union(&self.nodes[right as usize].aabb);
            }
            node_id = self.nodes[node_id as usize].parent;
        }
    }

    /// AVL-style rotation keeping the tree balanced.
    fn balance(&mut self, node_id: u32) -> u32 {
        if self.nodes[node_id as usize].is_leaf || self.nodes[node_id as usize].height < 2 {
            return node_id;
        }
        let left = self.nodes[node_id as usize].left;
        let right = self.nodes[node_id as usize].right;
        let balance_factor = self.nodes[right as usize].height - self.nodes[left as usize].height;
        if balance_factor > 1 {
            self.rotate_up(node_id, right)
        } else if balance_factor < -1 {
            self.rotate_up(node_id, left)
        } else {
            node_id
        }
    }

    /// Promote `child` above `node_id`, keeping the taller grandchild on
    /// the promoted side.
    fn rotate_up(&mut self, node_id: u32, child: u32) -> u32 {
        let c_left = self.nodes[child as usize].left;
        let c_right = self.nodes[child as usize].right;
        let parent = self.nodes[node_id as usize].parent;

        // child takes node_id's place
        self.nodes[child as usize].parent = parent;
        self.nodes[node_id as usize].parent = child;
        if parent != NULL_NODE {
            if self.nodes[parent as usize].left == node_id {
                self.nodes[parent as usize].left = child;
            } else {
                self.nodes[parent as usize].right = child;
            }
        } else {
            self.root = child;
        }

        let (keep, give) = {
            let lh = if c_left != NULL_NODE {
                self.nodes[c_left as usize].height
            } else {
                -1
            };
            let rh = if c_right != NULL_NODE {
                self.nodes[c_right as usize].height
            } else {
                -1
            };
            if lh > rh {
                (c_left, c_right)
            } else {
                (c_right, c_left)
            }
        };

        // child keeps its taller grandchild, node_id adopts the other
        if self.nodes[child as usize].left == keep {
            self.nodes[child as usize].right = node_id;
        } else {
            self.nodes[child as usize].left = node_id;
        }
        if self.nodes[node_id as usize].left == child {
            self.nodes[node_id as usize].left = give;
        } else {
            self.nodes[node_id as usize].right = give;
        }
        if give != NULL_NODE {
            self.nodes[give as usize].parent = node_id;
        }

        self.refresh_node(node_id);
        self.refresh_node(child);
        child
    }

    fn refresh_node(&mut self, node_id: u32) {
        let left = self.nodes[node_id as usize].left;
        let right = self.nodes[node_id as usize].right;
        if left != NULL_NODE && right != NULL_NODE {
            let lh = self.nodes[left as usize].height;
            let rh = self.nodes[right as usize].height;
            self.nodes[node_id as usize].height = 1 + lh.max(rh);
            self.nodes[node_id as usize].aabb = self.nodes[left as usize]
                .aabb
                .union(&self.nodes[right as usize].aabb);
        }
    }
}

impl Default for BroadPhase {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(body: u32) -> ProxyTarget {
        ProxyTarget {
            body,
            fixture: 0,
            child: 0,
        }
    }

    fn unit_aabb(x: f32, y: f32) -> Aabb {
        Aabb::new(Vec2::new(x, y), Vec2::new(x + 1.0, y + 1.0))
    }

    fn collect_pairs(bp: &mut BroadPhase) -> Vec<(u32, u32)> {
        let mut pairs = Vec::new();
        bp.update_pairs(|a, _, b, _| pairs.push((a, b)));
        pairs
    }

    #[test]
    fn test_insert_and_query() {
        let mut bp = BroadPhase::new();
        let p0 = bp.create_proxy(unit_aabb(0.0, 0.0), target(0));
        let _p1 = bp.create_proxy(unit_aabb(10.0, 10.0), target(1));
        let _p2 = bp.create_proxy(unit_aabb(20.0, 20.0), target(2));
        assert_eq!(bp.proxy_count(), 3);

        let mut hits = Vec::new();
        bp.query(&unit_aabb(-0.5, -0.5), |id| {
            hits.push(bp.target(id).body);
            true
        });
        assert!(hits.contains(&0));
        assert!(!hits.contains(&2));
        assert_eq!(bp.target(p0).body, 0);
    }

    #[test]
    fn test_new_proxies_form_pairs_once() {
        let mut bp = BroadPhase::new();
        let p0 = bp.create_proxy(unit_aabb(0.0, 0.0), target(0));
        let p1 = bp.create_proxy(unit_aabb(0.5, 0.0), target(1));
        let _far = bp.create_proxy(unit_aabb(50.0, 0.0), target(2));

        let pairs = collect_pairs(&mut bp);
        assert_eq!(pairs, vec![(p0.min(p1), p0.max(p1))]);

        // Nothing moved since: no pairs may be reported again
        assert!(collect_pairs(&mut bp).is_empty(), "pair reported twice");
    }

    #[test]
    fn test_touch_reports_pairs_again() {
        let mut bp = BroadPhase::new();
        let p0 = bp.create_proxy(unit_aabb(0.0, 0.0), target(0));
        let p1 = bp.create_proxy(unit_aabb(0.5, 0.0), target(1));
        collect_pairs(&mut bp);

        bp.touch_proxy(p0);
        let pairs = collect_pairs(&mut bp);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0], (p0.min(p1), p0.max(p1)));
    }

    #[test]
    fn test_small_move_does_not_reinsert() {
        let mut bp = BroadPhase::new();
        let p0 = bp.create_proxy(unit_aabb(0.0, 0.0), target(0));
        let reinserted = bp.move_proxy(p0, unit_aabb(0.02, 0.0), Vec2::new(0.02, 0.0));
        assert!(!reinserted, "movement within the fat margin must not reinsert");
    }

    #[test]
    fn test_large_move_reinserts_and_pairs() {
        let mut bp = BroadPhase::new();
        let p0 = bp.create_proxy(unit_aabb(0.0, 0.0), target(0));
        let p1 = bp.create_proxy(unit_aabb(30.0, 0.0), target(1));
        collect_pairs(&mut bp);

        let reinserted = bp.move_proxy(p0, unit_aabb(29.5, 0.0), Vec2::new(29.5, 0.0));
        assert!(reinserted);
        let pairs = collect_pairs(&mut bp);
        assert_eq!(pairs, vec![(p0.min(p1), p0.max(p1))]);
    }

    #[test]
    fn test_destroy_proxy() {
        let mut bp = BroadPhase::new();
        let p0 = bp.create_proxy(unit_aabb(0.0, 0.0), target(0));
        let p1 = bp.create_proxy(unit_aabb(0.5, 0.0), target(1));
        bp.destroy_proxy(p1);
        assert_eq!(bp.proxy_count(), 1);
        // The destroyed proxy may still sit in the moved buffer; pairs must
        // not reference it
        let pairs = collect_pairs(&mut bp);
        assert!(pairs.iter().all(|&(a, b)| a != p1 && b != p1));
        assert_eq!(bp.target(p0).body, 0);
    }

    #[test]
    fn test_tree_stays_balanced() {
        let mut bp = BroadPhase::new();
        for i in 0..100 {
            bp.create_proxy(unit_aabb(i as f32 * 3.0, 0.0), target(i));
        }
        assert_eq!(bp.proxy_count(), 100);
        assert!(bp.height() < 20, "tree should be balanced, height={}", bp.height());
    }

    #[test]
    fn test_ray_walk_visits_hit_leaf() {
        let mut bp = BroadPhase::new();
        let p0 = bp.create_proxy(unit_aabb(5.0, -0.5), target(0));
        let _p1 = bp.create_proxy(unit_aabb(5.0, 20.0), target(1));

        let mut visited = Vec::new();
        bp.ray_cast(Vec2::new(0.0, 0.0), Vec2::new(10.0, 0.0), 1.0, |id, max_f| {
            visited.push(id);
            max_f
        });
        assert!(visited.contains(&p0));
        assert_eq!(visited.len(), 1, "off-ray proxy must not be visited");
    }

    #[test]
    fn test_ray_walk_terminates_on_zero() {
        let mut bp = BroadPhase::new();
        for i in 0..5 {
            bp.create_proxy(unit_aabb(i as f32 * 2.0, -0.5), target(i));
        }
        let mut count = 0;
        bp.ray_cast(Vec2::new(-5.0, 0.0), Vec2::new(20.0, 0.0), 1.0, |_, _| {
            count += 1;
            0.0
        });
        assert_eq!(count, 1, "returning 0 must stop the walk");
    }
}
