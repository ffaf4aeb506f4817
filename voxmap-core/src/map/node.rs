use crate::geometry::octree_index::NUM_CHILDREN;
use serde::{Deserialize, Serialize};

/// A single octree node that owns its children.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node<T> {
    data: T,
    children: Option<Box<[Option<Node<T>>; NUM_CHILDREN]>>,
}

impl<T> Node<T> {
    pub fn new(data: T) -> Self {
        Node {
            data,
            children: None,
        }
    }

    #[inline]
    pub fn data(&self) -> &T {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut T {
        &mut self.data
    }

    pub fn child(&self, child_index: u8) -> Option<&Node<T>> {
        self.children
            .as_ref()
            .and_then(|children| children[child_index as usize].as_ref())
    }

    pub fn child_mut(&mut self, child_index: u8) -> Option<&mut Node<T>> {
        self.children
            .as_mut()
            .and_then(|children| children[child_index as usize].as_mut())
    }

    pub fn has_at_least_one_child(&self) -> bool {
        self.children
            .as_ref()
            .is_some_and(|children| children.iter().any(Option::is_some))
    }

    /// Inserts a new child node with the given data, replacing any child
    /// that was previously stored at that index.
    pub fn allocate_child(&mut self, child_index: u8, data: T) -> &mut Node<T> {
        let children = self.children.get_or_insert_with(Default::default);
        children[child_index as usize].insert(Node::new(data))
    }

    pub fn get_or_allocate_child(&mut self, child_index: u8) -> &mut Node<T>
    where
        T: Default,
    {
        let children = self.children.get_or_insert_with(Default::default);
        children[child_index as usize]
            .get_or_insert_with(|| Node::new(T::default()))
    }

    pub fn erase_child(&mut self, child_index: u8) {
        if let Some(children) = self.children.as_mut() {
            children[child_index as usize] = None;
        }
    }
}

impl<T: Default> Default for Node<T> {
    fn default() -> Self {
        Node::new(T::default())
    }
}
