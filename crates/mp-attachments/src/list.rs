//! Attachment list view
//!
//! Holds the attachments currently displayed for one work order. Every
//! refresh fetches the full server snapshot and replaces the displayed
//! collection wholesale; nothing is merged, so the last completed refresh
//! wins.

use std::sync::Arc;

use bytes::Bytes;
use mp_core::PortalResult;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::api::AttachmentApi;
use crate::model::{Attachment, AttachmentKind, StationCategory};
use crate::station::StationConfig;

/// Receives the full attachment set after each successful mutation
pub trait AttachmentSink: Send + Sync {
    fn on_upload_complete(&self, attachments: &[Attachment]);
}

impl<F> AttachmentSink for F
where
    F: Fn(&[Attachment]) + Send + Sync,
{
    fn on_upload_complete(&self, attachments: &[Attachment]) {
        self(attachments)
    }
}

/// Which attachments a view displays. Empty sets match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentFilter {
    pub categories: Vec<StationCategory>,
    pub kinds: Vec<AttachmentKind>,
}

impl AttachmentFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Attachments uploaded at `station`.
    pub fn for_station(station: &StationConfig) -> Self {
        Self {
            categories: vec![station.category.clone()],
            kinds: Vec::new(),
        }
    }

    pub fn with_kinds(mut self, kinds: Vec<AttachmentKind>) -> Self {
        self.kinds = kinds;
        self
    }

    pub fn matches(&self, attachment: &Attachment) -> bool {
        (self.categories.is_empty() || self.categories.contains(&attachment.category))
            && (self.kinds.is_empty() || self.kinds.contains(&attachment.kind))
    }
}

pub struct AttachmentListView {
    api: Arc<dyn AttachmentApi>,
    work_order_id: String,
    filter: AttachmentFilter,
    displayed: watch::Sender<Arc<Vec<Attachment>>>,
    sink: Option<Arc<dyn AttachmentSink>>,
}

impl AttachmentListView {
    pub fn new(
        api: Arc<dyn AttachmentApi>,
        work_order_id: impl Into<String>,
        filter: AttachmentFilter,
    ) -> Self {
        let (displayed, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            api,
            work_order_id: work_order_id.into(),
            filter,
            displayed,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AttachmentSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn work_order_id(&self) -> &str {
        &self.work_order_id
    }

    pub fn filter(&self) -> &AttachmentFilter {
        &self.filter
    }

    pub fn displayed(&self) -> Arc<Vec<Attachment>> {
        self.displayed.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Attachment>>> {
        self.displayed.subscribe()
    }

    pub fn find(&self, filename: &str) -> Option<Attachment> {
        self.displayed
            .borrow()
            .iter()
            .find(|a| a.filename == filename)
            .cloned()
    }

    /// Fetch the server set and replace the displayed collection.
    #[instrument(skip(self), fields(work_order_id = %self.work_order_id))]
    pub async fn refresh(&self) -> PortalResult<Arc<Vec<Attachment>>> {
        self.fetch_and_replace().await.map(|(_, shown)| shown)
    }

    /// Refresh, then hand the full fetched set to the parent view.
    #[instrument(skip(self), fields(work_order_id = %self.work_order_id))]
    pub async fn refresh_and_notify(&self) -> PortalResult<Arc<Vec<Attachment>>> {
        let (all, shown) = self.fetch_and_replace().await?;
        if let Some(sink) = &self.sink {
            sink.on_upload_complete(&all);
        }
        Ok(shown)
    }

    /// Delete an attachment, then refresh and notify. Only the delete itself
    /// can fail the call; a failed refresh is logged.
    #[instrument(skip(self), fields(work_order_id = %self.work_order_id))]
    pub async fn delete(&self, filename: &str) -> PortalResult<()> {
        self.api
            .delete_attachment(&self.work_order_id, filename)
            .await?;
        info!(filename = %filename, "Attachment deleted");

        if let Err(e) = self.refresh_and_notify().await {
            warn!(filename = %filename, error = %e, "Failed to refresh attachments after delete");
        }
        Ok(())
    }

    pub async fn download(&self, filename: &str) -> PortalResult<Bytes> {
        self.api
            .download_attachment(&self.work_order_id, filename)
            .await
    }

    async fn fetch_and_replace(&self) -> PortalResult<(Vec<Attachment>, Arc<Vec<Attachment>>)> {
        let all = self.api.list_attachments(&self.work_order_id).await?;
        let shown: Arc<Vec<Attachment>> = Arc::new(
            all.iter()
                .filter(|a| self.filter.matches(a))
                .cloned()
                .collect(),
        );
        debug!(total = all.len(), shown = shown.len(), "Attachment list refreshed");
        self.displayed.send_replace(shown.clone());
        Ok((all, shown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiCall, MemoryAttachmentApi};
    use crate::model::UploadedBy;
    use parking_lot::Mutex;

    fn attachment(filename: &str, category: StationCategory, kind: AttachmentKind) -> Attachment {
        Attachment {
            filename: filename.to_string(),
            original_name: filename.to_string(),
            category,
            kind,
            size: 3,
            uploaded_at: chrono::Utc::now(),
            uploaded_by: UploadedBy::Name("Ada".to_string()),
            cam_number: Some("CAM-1".to_string()),
            description: None,
            approved_at: None,
            rejection_reason: None,
        }
    }

    async fn seeded() -> Arc<MemoryAttachmentApi> {
        let api = Arc::new(MemoryAttachmentApi::new());
        api.insert(
            "wo-1",
            attachment("a.gbr", StationCategory::Intake, AttachmentKind::Gerber),
            Bytes::from_static(b"gbr"),
        )
        .await;
        api.insert(
            "wo-1",
            attachment("b.drl", StationCategory::NcDrill, AttachmentKind::DrillFile),
            Bytes::from_static(b"drl"),
        )
        .await;
        api.insert(
            "wo-1",
            attachment("c.png", StationCategory::Phototools, AttachmentKind::Film),
            Bytes::from_static(b"png"),
        )
        .await;
        api
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let api = seeded().await;
        let view = AttachmentListView::new(api.clone(), "wo-1", AttachmentFilter::all());

        let first = view.refresh().await.unwrap();
        let second = view.refresh().await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
        assert_eq!(view.displayed(), second);
    }

    #[tokio::test]
    async fn test_refresh_replaces_wholesale() {
        let api = seeded().await;
        let view = AttachmentListView::new(api.clone(), "wo-1", AttachmentFilter::all());
        view.refresh().await.unwrap();

        api.delete_attachment("wo-1", "a.gbr").await.unwrap();
        view.refresh().await.unwrap();

        let names: Vec<_> = view.displayed().iter().map(|a| a.filename.clone()).collect();
        assert_eq!(names, vec!["b.drl", "c.png"]);
        assert!(view.find("a.gbr").is_none());
    }

    #[tokio::test]
    async fn test_filter_by_station_and_kind() {
        let api = seeded().await;

        let drill = AttachmentListView::new(
            api.clone(),
            "wo-1",
            AttachmentFilter::for_station(&StationConfig::nc_drill()),
        );
        let shown = drill.refresh().await.unwrap();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].filename, "b.drl");

        let films = AttachmentListView::new(
            api.clone(),
            "wo-1",
            AttachmentFilter::all().with_kinds(vec![AttachmentKind::Film]),
        );
        assert_eq!(films.refresh().await.unwrap()[0].filename, "c.png");
    }

    #[tokio::test]
    async fn test_sink_receives_full_set() {
        let api = seeded().await;
        let received: Arc<Mutex<Vec<usize>>> = Arc::default();
        let sink = {
            let received = received.clone();
            move |attachments: &[Attachment]| received.lock().push(attachments.len())
        };

        let view = AttachmentListView::new(
            api.clone(),
            "wo-1",
            AttachmentFilter::for_station(&StationConfig::intake()),
        )
        .with_sink(Arc::new(sink));

        let shown = view.refresh_and_notify().await.unwrap();
        assert_eq!(shown.len(), 1);
        assert_eq!(*received.lock(), vec![3]);

        view.refresh().await.unwrap();
        assert_eq!(received.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_refreshes_and_notifies() {
        let api = seeded().await;
        let notified: Arc<Mutex<usize>> = Arc::default();
        let sink = {
            let notified = notified.clone();
            move |_: &[Attachment]| *notified.lock() += 1
        };
        let view = AttachmentListView::new(api.clone(), "wo-1", AttachmentFilter::all())
            .with_sink(Arc::new(sink));

        view.delete("b.drl").await.unwrap();
        assert_eq!(view.displayed().len(), 2);
        assert_eq!(*notified.lock(), 1);

        assert!(view.delete("b.drl").await.is_err());
        assert_eq!(*notified.lock(), 1);

        let data = view.download("a.gbr").await.unwrap();
        assert_eq!(data, Bytes::from_static(b"gbr"));
        assert!(api.calls().contains(&ApiCall::Download {
            work_order_id: "wo-1".to_string(),
            filename: "a.gbr".to_string()
        }));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_collection() {
        let api = seeded().await;
        let view = AttachmentListView::new(api.clone(), "wo-1", AttachmentFilter::all());
        view.refresh().await.unwrap();

        api.fail_list("Service unavailable");
        let err = view.refresh().await.unwrap_err();
        assert_eq!(err.user_message(), "Service unavailable");
        assert_eq!(view.displayed().len(), 3);
    }
}
