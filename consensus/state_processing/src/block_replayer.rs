use crate::{
    BlockProcessingError, BlockSignatureStrategy, ConsensusContext, SlotProcessingError,
    VerifyBlockRoot, per_block_processing, per_slot_processing,
};
use std::iter::Peekable;
use std::marker::PhantomData;
use types::{BeaconState, BeaconStateError, ChainSpec, Hash256, SignedBeaconBlock, Slot};

pub type PreSlotHook<'a, Error> = Box<dyn FnMut(Hash256, &mut BeaconState) -> Result<(), Error> + 'a>;
pub type StateRootIterDefault<Error> = std::iter::Empty<Result<(Hash256, Slot), Error>>;

/// Efficiently apply blocks to a state while configuring various parameters.
///
/// Usage follows a builder pattern.
pub struct BlockReplayer<
    'a,
    Error = BlockReplayError,
    StateRootIter: Iterator<Item = Result<(Hash256, Slot), Error>> = StateRootIterDefault<Error>,
> {
    state: BeaconState,
    spec: &'a ChainSpec,
    block_sig_strategy: BlockSignatureStrategy,
    verify_block_root: Option<VerifyBlockRoot>,
    pre_slot_hook: Option<PreSlotHook<'a, Error>>,
    pub(crate) state_root_iter: Option<Peekable<StateRootIter>>,
    state_root_miss: bool,
    _phantom: PhantomData<Error>,
}

#[derive(Debug)]
pub enum BlockReplayError {
    SlotProcessing(SlotProcessingError),
    BlockProcessing(BlockProcessingError),
    BeaconState(BeaconStateError),
}

impl From<SlotProcessingError> for BlockReplayError {
    fn from(e: SlotProcessingError) -> Self {
        Self::SlotProcessing(e)
    }
}

impl From<BlockProcessingError> for BlockReplayError {
    fn from(e: BlockProcessingError) -> Self {
        Self::BlockProcessing(e)
    }
}

impl From<BeaconStateError> for BlockReplayError {
    fn from(e: BeaconStateError) -> Self {
        Self::BeaconState(e)
    }
}

impl<'a, Error, StateRootIter> BlockReplayer<'a, Error, StateRootIter>
where
    StateRootIter: Iterator<Item = Result<(Hash256, Slot), Error>>,
    Error: From<BlockReplayError>,
{
    /// Create a new replayer that will apply blocks upon `state`.
    ///
    /// Defaults:
    ///
    /// - Full (bulk) signature verification
    /// - Full block root verification
    pub fn new(state: BeaconState, spec: &'a ChainSpec) -> Self {
        Self {
            state,
            spec,
            block_sig_strategy: BlockSignatureStrategy::VerifyBulk,
            verify_block_root: Some(VerifyBlockRoot::True),
            pre_slot_hook: None,
            state_root_iter: None,
            state_root_miss: false,
            _phantom: PhantomData,
        }
    }

    /// Set the replayer's block signature verification strategy.
    pub fn block_signature_strategy(mut self, block_sig_strategy: BlockSignatureStrategy) -> Self {
        self.block_sig_strategy = block_sig_strategy;
        self
    }

    /// Disable signature verification during replay.
    ///
    /// If you are truly _replaying_ blocks then you will almost certainly want to disable
    /// signature checks for performance.
    pub fn no_signature_verification(self) -> Self {
        self.block_signature_strategy(BlockSignatureStrategy::NoVerification)
    }

    /// Verify only the block roots of the initial few blocks, and trust the rest.
    pub fn minimal_block_root_verification(mut self) -> Self {
        self.verify_block_root = None;
        self
    }

    /// Supply a state root iterator to accelerate slot processing.
    ///
    /// If a state root iterator is not supplied, state roots will be computed from scratch at
    /// every slot.
    pub fn state_root_iter(mut self, iter: StateRootIter) -> Self {
        self.state_root_iter = Some(iter.peekable());
        self
    }

    /// Run a function immediately before each slot is advanced.
    pub fn pre_slot_hook(mut self, hook: PreSlotHook<'a, Error>) -> Self {
        self.pre_slot_hook = Some(hook);
        self
    }

    /// Compute the state root for `slot` as efficiently as possible.
    ///
    /// The `blocks` should be the full list of blocks being applied and `i` should be the index
    /// of the next block that will be applied.
    fn get_state_root(
        &mut self,
        slot: Slot,
        blocks: &[SignedBeaconBlock],
        i: usize,
    ) -> Result<Option<Hash256>, Error> {
        // If a state root iterator is configured, use it to find the root for this slot.
        if let Some(state_root_iter) = &mut self.state_root_iter {
            let opt_root = state_root_iter
                .peeking_take_while_slot(slot)
                .transpose()?;
            if let Some((root, _)) = opt_root {
                return Ok(Some(root));
            }
        }

        // The state root at the slot of the most recently applied block is carried in that
        // block's header, no hashing needed.
        if i > 0
            && let Some(prev_block) = blocks.get(i - 1)
            && prev_block.slot() == slot
        {
            return Ok(Some(prev_block.state_root()));
        }

        self.state_root_miss = true;
        Ok(None)
    }

    /// Apply `blocks` atop `self.state`, advancing empty slots as required, stopping at
    /// `target_slot` if provided.
    pub fn apply_blocks(
        mut self,
        blocks: Vec<SignedBeaconBlock>,
        target_slot: Option<Slot>,
    ) -> Result<Self, Error> {
        for (i, block) in blocks.iter().enumerate() {
            // Allow one additional block at the start of the replay whose slot equals the
            // state's slot: the block that produced the starting state.
            if block.slot() <= self.state.slot {
                continue;
            }

            while self.state.slot < block.slot() {
                let state_root = self.get_state_root(self.state.slot, &blocks, i)?;
                if let Some(ref mut pre_slot_hook) = self.pre_slot_hook {
                    pre_slot_hook(state_root.unwrap_or_default(), &mut self.state)?;
                }
                per_slot_processing(&mut self.state, state_root, self.spec)
                    .map_err(BlockReplayError::from)?;
            }

            let mut ctxt = ConsensusContext::new(block.slot());
            per_block_processing(
                &mut self.state,
                block,
                self.block_sig_strategy,
                self.verify_block_root.unwrap_or(VerifyBlockRoot::False),
                &mut ctxt,
                self.spec,
            )
            .map_err(BlockReplayError::from)?;
        }

        if let Some(target_slot) = target_slot {
            while self.state.slot < target_slot {
                let state_root = self.get_state_root(self.state.slot, &blocks, blocks.len())?;
                if let Some(ref mut pre_slot_hook) = self.pre_slot_hook {
                    pre_slot_hook(state_root.unwrap_or_default(), &mut self.state)?;
                }
                per_slot_processing(&mut self.state, state_root, self.spec)
                    .map_err(BlockReplayError::from)?;
            }
        }

        Ok(self)
    }

    /// Whether a state root was unavailable and had to be computed from scratch.
    pub fn state_root_miss(&self) -> bool {
        self.state_root_miss
    }

    /// After block application, return the resultant state.
    pub fn into_state(self) -> BeaconState {
        self.state
    }
}

trait PeekingTakeWhileSlot<Error> {
    fn peeking_take_while_slot(
        &mut self,
        slot: Slot,
    ) -> Option<Result<(Hash256, Slot), Error>>;
}

impl<I, Error> PeekingTakeWhileSlot<Error> for Peekable<I>
where
    I: Iterator<Item = Result<(Hash256, Slot), Error>>,
{
    /// Advance the iterator until the entry for `slot` is found, consuming earlier entries.
    fn peeking_take_while_slot(&mut self, slot: Slot) -> Option<Result<(Hash256, Slot), Error>> {
        loop {
            match self.peek() {
                Some(Ok((_, item_slot))) if *item_slot < slot => {
                    self.next();
                }
                Some(Ok((_, item_slot))) if *item_slot == slot => return self.next(),
                Some(Ok(_)) => return None,
                Some(Err(_)) => return self.next(),
                None => return None,
            }
        }
    }
}
