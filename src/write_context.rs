use std::collections::VecDeque;

use block::Block;

/// The unit of work handed to a `Pipeline`: the blocks to write, in order, followed by
/// whichever end-of-connection actions were requested while they were pending.
pub struct WriteContext {
    pub blocks: VecDeque<Block>,
    pub shutdown_send: bool,
    pub disconnect: bool,
}

impl WriteContext {
    pub fn new() -> WriteContext {
        WriteContext {
            blocks: VecDeque::new(),
            shutdown_send: false,
            disconnect: false,
        }
    }
}
