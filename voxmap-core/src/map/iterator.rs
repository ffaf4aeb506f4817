use crate::geometry::octree_index::NUM_CHILDREN;
use crate::map::node::Node;
use std::collections::VecDeque;

/// Yields the subtree's nodes parent-first, visiting each node before any
/// of its descendants.
pub struct DepthFirstPreorder<'a, T> {
    upcoming: Vec<&'a Node<T>>,
}

/// Yields the subtree's nodes children-first, visiting each node after all
/// of its descendants.
pub struct DepthFirstPostorder<'a, T> {
    // The bool marks nodes whose children have already been pushed.
    stack: Vec<(&'a Node<T>, bool)>,
}

/// Yields the subtree's nodes level by level.
pub struct BreadthFirst<'a, T> {
    queue: VecDeque<&'a Node<T>>,
}

impl<T> Node<T> {
    pub fn iter_depth_first_preorder(&self) -> DepthFirstPreorder<'_, T> {
        DepthFirstPreorder {
            upcoming: vec![self],
        }
    }

    pub fn iter_depth_first_postorder(&self) -> DepthFirstPostorder<'_, T> {
        DepthFirstPostorder {
            stack: vec![(self, false)],
        }
    }

    pub fn iter_breadth_first(&self) -> BreadthFirst<'_, T> {
        BreadthFirst {
            queue: VecDeque::from([self]),
        }
    }
}

fn push_children_reversed<'a, T>(node: &'a Node<T>, out: &mut impl FnMut(&'a Node<T>)) {
    for child_index in (0..NUM_CHILDREN as u8).rev() {
        if let Some(child) = node.child(child_index) {
            out(child);
        }
    }
}

impl<'a, T> Iterator for DepthFirstPreorder<'a, T> {
    type Item = &'a Node<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.upcoming.pop()?;
        push_children_reversed(node, &mut |child| self.upcoming.push(child));
        Some(node)
    }
}

impl<'a, T> Iterator for DepthFirstPostorder<'a, T> {
    type Item = &'a Node<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (node, expanded) = self.stack.pop()?;
            if expanded {
                return Some(node);
            }
            self.stack.push((node, true));
            push_children_reversed(node, &mut |child| self.stack.push((child, false)));
        }
    }
}

impl<'a, T> Iterator for BreadthFirst<'a, T> {
    type Item = &'a Node<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.queue.pop_front()?;
        for child_index in 0..NUM_CHILDREN as u8 {
            if let Some(child) = node.child(child_index) {
                self.queue.push_back(child);
            }
        }
        Some(node)
    }
}
