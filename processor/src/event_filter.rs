use data_model::{EventKind, ObjectKey, Resource, WatchEvent};

/// Maps a watch event to the request that has to be reconciled, or `None`
/// when the event cannot change the outcome of a pass.
///
/// Request status writes and deletions are dropped, so the controller's own
/// status updates never feed back into the queue. Job events only matter
/// when the job status moved.
pub fn reconcile_key_for(event: &WatchEvent) -> Option<ObjectKey> {
    match (&event.kind, &event.object) {
        (EventKind::Added, Resource::Request(request)) => Some(request.key()),
        (EventKind::Modified, Resource::Request(request)) => match &event.previous {
            Some(Resource::Request(previous))
                if previous.metadata.generation == request.metadata.generation =>
            {
                None
            }
            _ => Some(request.key()),
        },
        (EventKind::Modified, Resource::Job(job)) => match &event.previous {
            Some(Resource::Job(previous)) if previous.status == job.status => None,
            _ => Some(job.owner_key()),
        },
        (EventKind::Deleted, _) | (EventKind::Added, Resource::Job(_)) => None,
    }
}
