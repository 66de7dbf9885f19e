/*!
 * Synchronization Module
 * Result cells, operation futures and join combinators
 */

pub mod combinators;
pub mod promise;

pub use combinators::{
    when_all, when_all_futures, when_all_settled, when_all_settled_futures, when_any,
    when_any_futures, when_any_settled, when_any_settled_futures,
};
pub use promise::{OpFuture, ResultCell, TypedFuture};
