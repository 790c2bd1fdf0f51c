//! Block-randomized trial sequences.

use crate::task::TaskType;
use rand::seq::SliceRandom;
use rand::Rng;

/// Concatenate `repetitions` independently shuffled copies of `tasks`.
///
/// Every block of `tasks.len()` consecutive entries is a permutation of
/// `tasks`. Shuffling is per block, so the last task of one block may repeat as
/// the first of the next.
pub fn generate_sequence<R: Rng + ?Sized>(
    tasks: &[TaskType],
    repetitions: usize,
    rng: &mut R,
) -> Vec<TaskType> {
    let mut sequence = Vec::with_capacity(tasks.len() * repetitions);
    for _ in 0..repetitions {
        let mut block = tasks.to_vec();
        block.shuffle(rng);
        sequence.extend(block);
    }
    sequence
}
