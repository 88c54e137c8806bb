//! In-memory chain of sealed blocks.
//!
//! Blocks are only ever appended at the tip. Each one must name the current
//! tip as its predecessor; the first block names the all-zero ID.

use super::block::{Block, BlockError};
use crate::crypto::{to_base58, Hash};
use crate::transaction::Transaction;

/// Ordered chain of validated blocks.
#[derive(Debug, Clone, Default)]
pub struct Blockchain {
    blocks: Vec<Block>,
}

impl Blockchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// ID the next block has to link to.
    pub fn tip_id(&self) -> Hash {
        self.blocks.last().map(Block::id).unwrap_or([0u8; 32])
    }

    /// Verifies `block` and appends it to the tip.
    pub fn append(&mut self, block: Block) -> Result<(), BlockError> {
        let expected = self.tip_id();
        if block.header.prev_block_id != expected {
            return Err(BlockError::Disconnected {
                expected: to_base58(&expected),
                actual: to_base58(&block.header.prev_block_id),
            });
        }
        block.verify()?;
        self.blocks.push(block);
        Ok(())
    }

    pub fn tip(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Number of blocks.
    pub fn height(&self) -> u64 {
        self.blocks.len() as u64
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Searches every block, newest first.
    pub fn transaction_by_id(&self, id: &Hash) -> Option<&Transaction> {
        self.blocks
            .iter()
            .rev()
            .find_map(|block| block.transaction_by_id(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::transaction::new_genesis_transaction;

    #[test]
    fn blocks_link_to_the_tip() {
        let kp = KeyPair::generate().unwrap();
        let mut chain = Blockchain::new();
        assert_eq!(chain.tip_id(), [0u8; 32]);

        let genesis = new_genesis_transaction(&kp, b"hello".to_vec()).unwrap();
        let gid = *genesis.id();
        let first = Block::seal(&kp, chain.tip_id(), vec![genesis], 1).unwrap();
        let first_id = first.id();
        chain.append(first).unwrap();

        let second = Block::seal(&kp, chain.tip_id(), Vec::new(), 2).unwrap();
        chain.append(second).unwrap();

        assert_eq!(chain.height(), 2);
        assert_eq!(chain.blocks()[1].header.prev_block_id, first_id);
        assert_eq!(chain.transaction_by_id(&gid).unwrap().meta, b"hello");
        assert!(chain.transaction_by_id(&[9u8; 32]).is_none());
    }

    #[test]
    fn disconnected_block_is_refused() {
        let kp = KeyPair::generate().unwrap();
        let mut chain = Blockchain::new();
        let stray = Block::seal(&kp, [7u8; 32], Vec::new(), 1).unwrap();
        assert!(matches!(
            chain.append(stray),
            Err(BlockError::Disconnected { .. })
        ));
        assert_eq!(chain.height(), 0);
        assert!(chain.tip().is_none());
    }

    #[test]
    fn invalid_block_is_refused() {
        let kp = KeyPair::generate().unwrap();
        let mut chain = Blockchain::new();
        let mut block = Block::seal(&kp, [0u8; 32], Vec::new(), 1).unwrap();
        block.header.timestamp = 2;
        assert!(matches!(
            chain.append(block),
            Err(BlockError::InvalidSignature)
        ));
    }
}
