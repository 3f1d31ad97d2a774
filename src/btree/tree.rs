//! # B+Tree Index
//!
//! The index façade plus everything structural: attach/detach, free-list
//! allocation, recursive descent, and the mutation engine (leaf split,
//! interior split, root split, parent promotion).
//!
//! ## Block Roles
//!
//! Block 0 is the superblock; it owns the authoritative `rootnode` and
//! `freelist` fields. Immediately after a fresh attach, block 1 is the root
//! and blocks 2..N form the free chain:
//!
//! ```text
//!                  [Root (leaf-shaped)]        superblock.rootnode = 1
//!                                              superblock.freelist = 2
//!  free: 2 -> 3 -> 4 -> ... -> N-1 -> 0
//! ```
//!
//! ## Insert Algorithm
//!
//! ```text
//! 1. Descend from the root recording the path of block indices
//! 2. Target leaf not full: shift-insert the pair, serialize, done
//! 3. Target full: pre-stage every block the split chain will need
//! 4. Split the leaf; promote the left half's largest key
//! 5. Walk the recorded path upward, splitting full ancestors; a full
//!    root splits into two interiors under a new interior-shaped root
//! ```
//!
//! The split chain is computed from the recorded path *before* any block is
//! modified, and all needed blocks are allocated up front. If the free list
//! runs dry mid-staging the staged blocks are released again, so `NoSpace`
//! always leaves the tree exactly as it was.
//!
//! ## Root Shape
//!
//! The root is leaf-shaped until the first root split and interior-shaped
//! forever after. The shape is stored in the node header's flag bit rather
//! than inferred, and capacity checks dispatch on the payload shape, so a
//! leaf-shaped root fills at leaf capacity.
//!
//! ## Concurrency
//!
//! None. The index borrows its store mutably for its whole lifetime; every
//! operation is synchronous and returns only after all touched blocks have
//! been written back.

use smallvec::SmallVec;

use crate::btree::node::{Node, NodeType, PayloadKind, FLAG_INTERIOR_ROOT};
use crate::error::{IndexError, Result};
use crate::storage::BlockStore;

/// Block indices visited during a descent, root first, target leaf last.
pub type Path = SmallVec<[u32; 8]>;

/// Blocks allocated up front for a split chain; consumed in order.
struct StagedBlocks {
    blocks: SmallVec<[u32; 4]>,
    next: usize,
}

impl StagedBlocks {
    fn take(&mut self) -> Result<u32> {
        let block = self
            .blocks
            .get(self.next)
            .copied()
            .ok_or(IndexError::Insane("split consumed more blocks than staged"))?;
        self.next += 1;
        Ok(block)
    }
}

pub struct BTreeIndex<'a, S: BlockStore> {
    store: &'a mut S,
    superblock: Node,
    superblock_index: u32,
}

impl<'a, S: BlockStore> std::fmt::Debug for BTreeIndex<'a, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTreeIndex")
            .field("superblock", &self.superblock)
            .field("superblock_index", &self.superblock_index)
            .finish()
    }
}

impl<'a, S: BlockStore> BTreeIndex<'a, S> {
    /// Mount the tree whose superblock lives at `initblock`. With
    /// `create = true` the store is formatted first: superblock, an empty
    /// leaf-shaped root at block 1, and all remaining blocks threaded into
    /// the free list. With `create = false` the key and value sizes are
    /// taken from the superblock and the arguments are ignored.
    pub fn attach(
        store: &'a mut S,
        keysize: u32,
        valuesize: u32,
        initblock: u32,
        create: bool,
    ) -> Result<Self> {
        if initblock != 0 {
            return Err(IndexError::Insane("superblock must live at block 0"));
        }

        if create {
            Self::format(store, keysize, valuesize)?;
        }

        let superblock = Node::read_from(store, initblock)?;
        if superblock.node_type() != NodeType::Superblock {
            return Err(IndexError::BadNodeType(
                superblock.header().node_type_byte(),
            ));
        }
        if superblock.header().blocksize() as usize != store.block_size() {
            return Err(IndexError::Insane(
                "superblock geometry does not match the store",
            ));
        }

        Ok(Self {
            store,
            superblock,
            superblock_index: initblock,
        })
    }

    pub fn create(store: &'a mut S, keysize: u32, valuesize: u32) -> Result<Self> {
        Self::attach(store, keysize, valuesize, 0, true)
    }

    pub fn open(store: &'a mut S) -> Result<Self> {
        Self::attach(store, 0, 0, 0, false)
    }

    fn format(store: &mut S, keysize: u32, valuesize: u32) -> Result<()> {
        let blocksize = store.block_size() as u32;
        let count = store.block_count();
        if count < 2 {
            return Err(IndexError::NoSpace);
        }

        // A split must be able to distribute a full node plus one entry
        // across two halves, so both shapes need at least two slots.
        let probe = Node::new(NodeType::Leaf, keysize, valuesize, blocksize)?;
        if probe.leaf_slots() < 2 || probe.interior_slots() < 2 {
            return Err(IndexError::Insane(
                "block size too small for this key and value geometry",
            ));
        }

        let rootnode = 1u32;
        let freelist = if count > 2 { 2 } else { 0 };

        let mut superblock = Node::new(NodeType::Superblock, keysize, valuesize, blocksize)?;
        superblock.header_mut().set_rootnode(rootnode);
        superblock.header_mut().set_freelist(freelist);
        store.notify_allocate(0);
        superblock.write_to(store, 0)?;

        let mut root = Node::new(NodeType::Root, keysize, valuesize, blocksize)?;
        root.header_mut().set_rootnode(rootnode);
        root.header_mut().set_freelist(freelist);
        store.notify_allocate(rootnode);
        root.write_to(store, rootnode)?;

        for i in 2..count {
            let mut free = Node::new(NodeType::Unallocated, keysize, valuesize, blocksize)?;
            free.header_mut().set_rootnode(rootnode);
            free.header_mut()
                .set_freelist(if i + 1 == count { 0 } else { i + 1 });
            free.write_to(store, i)?;
        }

        Ok(())
    }

    /// Flush the superblock and return its block index.
    pub fn detach(&mut self) -> Result<u32> {
        self.superblock
            .write_to(self.store, self.superblock_index)?;
        Ok(self.superblock_index)
    }

    pub fn rootnode(&self) -> u32 {
        self.superblock.header().rootnode()
    }

    pub fn freelist_head(&self) -> u32 {
        self.superblock.header().freelist()
    }

    pub fn keysize(&self) -> usize {
        self.superblock.header().keysize() as usize
    }

    pub fn valuesize(&self) -> usize {
        self.superblock.header().valuesize() as usize
    }

    pub(crate) fn read_node(&mut self, block: u32) -> Result<Node> {
        Node::read_from(self.store, block)
    }

    #[cfg(test)]
    pub(crate) fn write_node(&mut self, block: u32, node: &Node) -> Result<()> {
        node.write_to(self.store, block)
    }

    fn fresh_node(&self, node_type: NodeType) -> Result<Node> {
        let header = self.superblock.header();
        let mut node = Node::new(
            node_type,
            header.keysize(),
            header.valuesize(),
            header.blocksize(),
        )?;
        node.header_mut().set_rootnode(header.rootnode());
        node.header_mut().set_freelist(header.freelist());
        Ok(node)
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.keysize() {
            return Err(IndexError::WrongLength {
                what: "key",
                expected: self.keysize(),
                got: key.len(),
            });
        }
        Ok(())
    }

    fn check_value(&self, value: &[u8]) -> Result<()> {
        if value.len() != self.valuesize() {
            return Err(IndexError::WrongLength {
                what: "value",
                expected: self.valuesize(),
                got: value.len(),
            });
        }
        Ok(())
    }

    /// Pop the free-list head. The returned block still carries its
    /// unallocated header; the caller overwrites it.
    pub fn allocate_node(&mut self) -> Result<u32> {
        let head = self.superblock.header().freelist();
        if head == 0 {
            return Err(IndexError::NoSpace);
        }

        let node = Node::read_from(self.store, head)?;
        if node.node_type() != NodeType::Unallocated {
            return Err(IndexError::Insane(
                "free-list head is not an unallocated block",
            ));
        }

        self.superblock
            .header_mut()
            .set_freelist(node.header().freelist());
        self.superblock
            .write_to(self.store, self.superblock_index)?;
        self.store.notify_allocate(head);

        Ok(head)
    }

    /// Push block `n` onto the free list and mark it unallocated.
    pub fn deallocate_node(&mut self, n: u32) -> Result<()> {
        let mut node = Node::read_from(self.store, n)?;
        if node.node_type() == NodeType::Unallocated {
            return Err(IndexError::Insane("block deallocated twice"));
        }

        node.header_mut().set_node_type(NodeType::Unallocated);
        node.header_mut().set_flags(0);
        node.header_mut()
            .set_freelist(self.superblock.header().freelist());
        node.write_to(self.store, n)?;

        self.superblock.header_mut().set_freelist(n);
        self.superblock
            .write_to(self.store, self.superblock_index)?;
        self.store.notify_deallocate(n);

        Ok(())
    }

    /// Child to descend into: the pointer left of the first separator
    /// `>=` the probe key, so keys equal to a separator are found in the
    /// left subtree.
    fn select_child(node: &Node, key: &[u8]) -> Result<u32> {
        let n = node.numkeys();
        for i in 0..n {
            if key <= node.key_at(i)? {
                return node.ptr_at(i);
            }
        }
        if n > 0 {
            node.ptr_at(n)
        } else {
            Err(IndexError::Nonexistent)
        }
    }

    /// Descend to the leaf slot holding an exact match for `key`.
    fn find_pair(&mut self, block: u32, key: &[u8]) -> Result<(u32, Node, usize)> {
        let node = Node::read_from(self.store, block)?;
        match node.payload_kind() {
            Some(PayloadKind::Interior) => {
                let child = Self::select_child(&node, key)?;
                self.find_pair(child, key)
            }
            Some(PayloadKind::Leaf) => {
                for i in 0..node.numkeys() {
                    if node.key_at(i)? == key {
                        return Ok((block, node, i));
                    }
                }
                Err(IndexError::Nonexistent)
            }
            None => Err(IndexError::Insane("traversal reached a non-tree block")),
        }
    }

    /// Descend to the leaf an insert of `key` targets, recording every
    /// visited block in `path`.
    fn find_leaf(&mut self, block: u32, key: &[u8], path: &mut Path) -> Result<()> {
        path.push(block);
        let node = Node::read_from(self.store, block)?;
        match node.payload_kind() {
            Some(PayloadKind::Interior) => {
                let child = Self::select_child(&node, key)?;
                self.find_leaf(child, key, path)
            }
            Some(PayloadKind::Leaf) => Ok(()),
            None => Err(IndexError::Insane("traversal reached a non-tree block")),
        }
    }

    pub fn lookup(&mut self, key: &[u8]) -> Result<Vec<u8>> {
        self.check_key(key)?;
        let root = self.rootnode();
        let (_, node, slot) = self.find_pair(root, key)?;
        Ok(node.value_at(slot)?.to_vec())
    }

    pub fn update(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key(key)?;
        self.check_value(value)?;
        let root = self.rootnode();
        let (block, mut node, slot) = self.find_pair(root, key)?;
        node.set_value(slot, value)?;
        node.write_to(self.store, block)
    }

    /// Deletion is not implemented; the tree only grows.
    pub fn delete(&mut self, _key: &[u8]) -> Result<()> {
        Err(IndexError::Unimplemented)
    }

    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key(key)?;
        self.check_value(value)?;

        let mut path = Path::new();
        let root = self.rootnode();
        self.find_leaf(root, key, &mut path)?;
        let target_index = path
            .pop()
            .ok_or(IndexError::Insane("descent recorded no blocks"))?;
        let mut target = Node::read_from(self.store, target_index)?;

        if !target.is_full()? {
            target.insert_pair(key, value)?;
            return target.write_to(self.store, target_index);
        }

        let splitting_root_leaf = target.node_type() == NodeType::Root;
        let mut staged = self.stage_split_blocks(&path, splitting_root_leaf)?;

        if splitting_root_leaf {
            let new_root_index = staged.take()?;
            let new_leaf_index = staged.take()?;

            target.header_mut().set_node_type(NodeType::Leaf);
            let promoted =
                self.split_leaf(&mut target, target_index, new_leaf_index, key, value)?;
            self.install_root(new_root_index, &promoted, target_index, new_leaf_index)?;
        } else {
            let new_leaf_index = staged.take()?;
            let promoted =
                self.split_leaf(&mut target, target_index, new_leaf_index, key, value)?;
            self.promote(&mut path, &mut staged, promoted, new_leaf_index)?;
        }

        self.superblock
            .write_to(self.store, self.superblock_index)
    }

    /// Walk the path the insert will split along and allocate every block
    /// it needs before anything is modified.
    fn stage_split_blocks(
        &mut self,
        path: &[u32],
        splitting_root_leaf: bool,
    ) -> Result<StagedBlocks> {
        let mut needed = if splitting_root_leaf { 2 } else { 1 };
        if !splitting_root_leaf {
            for &ancestor in path.iter().rev() {
                let node = Node::read_from(self.store, ancestor)?;
                if !node.is_full()? {
                    break;
                }
                if node.node_type() == NodeType::Root {
                    needed += 2;
                    break;
                }
                needed += 1;
            }
        }

        let mut blocks: SmallVec<[u32; 4]> = SmallVec::new();
        for _ in 0..needed {
            match self.allocate_node() {
                Ok(block) => blocks.push(block),
                Err(err) => {
                    self.release_staged(&blocks)?;
                    return Err(err);
                }
            }
        }

        Ok(StagedBlocks { blocks, next: 0 })
    }

    /// Return staged-but-unused blocks to the free list. They were never
    /// written, so they still carry unallocated headers; relinking in
    /// reverse order restores the original free-list head.
    fn release_staged(&mut self, blocks: &[u32]) -> Result<()> {
        for &block in blocks.iter().rev() {
            let mut node = Node::read_from(self.store, block)?;
            node.header_mut()
                .set_freelist(self.superblock.header().freelist());
            node.write_to(self.store, block)?;
            self.superblock.header_mut().set_freelist(block);
            self.superblock
                .write_to(self.store, self.superblock_index)?;
            self.store.notify_deallocate(block);
        }
        Ok(())
    }

    /// Redistribute a full leaf plus the incoming pair across `left` and a
    /// new right sibling. Returns the promoted separator: the largest key
    /// remaining in the left half.
    fn split_leaf(
        &mut self,
        left: &mut Node,
        left_index: u32,
        right_index: u32,
        key: &[u8],
        value: &[u8],
    ) -> Result<Vec<u8>> {
        let n = left.numkeys();
        let mut pairs: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(n + 1);
        for i in 0..n {
            let (k, v) = left.pair_at(i)?;
            pairs.push((k.to_vec(), v.to_vec()));
        }

        let pos = pairs
            .iter()
            .position(|(k, _)| k.as_slice() >= key)
            .unwrap_or(n);
        pairs.insert(pos, (key.to_vec(), value.to_vec()));

        let mid = pairs.len() / 2;

        left.header_mut().set_numkeys(mid as u32);
        for (i, (k, v)) in pairs[..mid].iter().enumerate() {
            left.set_pair(i, k, v)?;
        }

        let mut right = self.fresh_node(NodeType::Leaf)?;
        right.header_mut().set_numkeys((pairs.len() - mid) as u32);
        for (i, (k, v)) in pairs[mid..].iter().enumerate() {
            right.set_pair(i, k, v)?;
        }

        left.write_to(self.store, left_index)?;
        right.write_to(self.store, right_index)?;

        Ok(pairs[mid - 1].0.clone())
    }

    /// Redistribute a full interior node plus the incoming separator across
    /// `left` and a new right sibling. The middle key is promoted and
    /// belongs to neither child.
    fn split_interior(
        &mut self,
        left: &mut Node,
        left_index: u32,
        right_index: u32,
        key: &[u8],
        right_child: u32,
    ) -> Result<Vec<u8>> {
        let n = left.numkeys();
        let mut keys: Vec<Vec<u8>> = Vec::with_capacity(n + 1);
        let mut children: Vec<u32> = Vec::with_capacity(n + 2);
        for i in 0..n {
            keys.push(left.key_at(i)?.to_vec());
        }
        for i in 0..=n {
            children.push(left.ptr_at(i)?);
        }

        let pos = keys
            .iter()
            .position(|k| k.as_slice() >= key)
            .unwrap_or(n);
        keys.insert(pos, key.to_vec());
        children.insert(pos + 1, right_child);

        let mid = keys.len() / 2;
        let promoted = keys[mid].clone();

        left.header_mut().set_numkeys(mid as u32);
        for (i, k) in keys[..mid].iter().enumerate() {
            left.set_key(i, k)?;
        }
        for (i, &child) in children[..=mid].iter().enumerate() {
            left.set_ptr(i, child)?;
        }

        let right_keys = keys.len() - mid - 1;
        let mut right = self.fresh_node(NodeType::Interior)?;
        right.header_mut().set_numkeys(right_keys as u32);
        for (i, k) in keys[mid + 1..].iter().enumerate() {
            right.set_key(i, k)?;
        }
        for (i, &child) in children[mid + 1..].iter().enumerate() {
            right.set_ptr(i, child)?;
        }

        left.write_to(self.store, left_index)?;
        right.write_to(self.store, right_index)?;

        Ok(promoted)
    }

    /// Insert a promoted separator into the next parent on the path,
    /// splitting upward as long as parents are full.
    fn promote(
        &mut self,
        path: &mut Path,
        staged: &mut StagedBlocks,
        key: Vec<u8>,
        right_child: u32,
    ) -> Result<()> {
        let parent_index = path
            .pop()
            .ok_or(IndexError::Insane("split propagated past the root"))?;
        let mut parent = Node::read_from(self.store, parent_index)?;

        if !parent.is_full()? {
            parent.insert_separator(&key, right_child)?;
            return parent.write_to(self.store, parent_index);
        }

        if parent.node_type() == NodeType::Root {
            let new_sibling_index = staged.take()?;
            let new_root_index = staged.take()?;

            parent.header_mut().set_node_type(NodeType::Interior);
            parent.header_mut().set_flags(0);
            let promoted = self.split_interior(
                &mut parent,
                parent_index,
                new_sibling_index,
                &key,
                right_child,
            )?;
            self.install_root(new_root_index, &promoted, parent_index, new_sibling_index)
        } else {
            let new_sibling_index = staged.take()?;
            let promoted = self.split_interior(
                &mut parent,
                parent_index,
                new_sibling_index,
                &key,
                right_child,
            )?;
            self.promote(path, staged, promoted, new_sibling_index)
        }
    }

    /// Write a new interior-shaped root holding one separator and two
    /// children, and point the superblock at it.
    fn install_root(
        &mut self,
        new_root_index: u32,
        separator: &[u8],
        left_child: u32,
        right_child: u32,
    ) -> Result<()> {
        let mut new_root = self.fresh_node(NodeType::Root)?;
        new_root.header_mut().set_flags(FLAG_INTERIOR_ROOT);
        new_root.header_mut().set_numkeys(1);
        new_root.header_mut().set_rootnode(new_root_index);
        new_root.set_key(0, separator)?;
        new_root.set_ptr(0, left_child)?;
        new_root.set_ptr(1, right_child)?;
        new_root.write_to(self.store, new_root_index)?;

        self.superblock.header_mut().set_rootnode(new_root_index);
        self.superblock
            .write_to(self.store, self.superblock_index)
    }
}
