use crate::garmin_client::ActivityApi;

mod store;
mod sync;

pub use store::{ActivityStore, MergeStrategy};
pub use sync::{SyncReport, run_sync};

/// One incremental sync of the activity list into an [`ActivityStore`].
pub struct ActivitySync<'a, A: ActivityApi> {
    api: A,
    store: &'a mut ActivityStore,
    strategy: MergeStrategy,
    count: u32,
    filter: Option<&'a str>,
}

impl<'a, A: ActivityApi> ActivitySync<'a, A> {
    pub fn new(
        api: A,
        store: &'a mut ActivityStore,
        strategy: MergeStrategy,
        count: u32,
        filter: Option<&'a str>,
    ) -> Self {
        Self {
            api,
            store,
            strategy,
            count,
            filter,
        }
    }
}
