//! Streaming tarball uploads

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use camino::Utf8PathBuf;
use tokio::io::{self, AsyncWrite, AsyncWriteExt as _, DuplexStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument as _;

use crate::error::{PackageError, PackageResult};
use crate::helper::StorageHelper;
use crate::PIPE_CAPACITY;

/// Events emitted by a [`TarballUpload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    /// The tarball does not exist yet and data is flowing to the backend.
    Open,
    /// The backend acknowledged the complete tarball.
    Success,
    /// The upload failed.
    Error(PackageError),
}

/// Where an upload is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Checking whether the tarball already exists.
    Pending,
    /// Streaming to the backend.
    Open,
    /// Stored.
    Success,
    /// Failed, see the error event.
    Failed,
    /// Cancelled through [`TarballUpload::abort`].
    Aborted,
}

impl UploadState {
    /// Whether no further events will follow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadState::Success | UploadState::Failed | UploadState::Aborted
        )
    }
}

/// A tarball upload in progress.
///
/// Returned before any I/O happens. Write the tarball into the handle, then
/// shut it down (or call [`finish`](Self::finish)) to mark the end of the
/// data. Writes suspend while the backend is behind.
///
/// Events are buffered, so [`next_event`](Self::next_event) sees every event
/// no matter when it is first called.
///
/// Dropping the handle before shutting it down aborts the upload.
///
/// The existence check and the upload are not atomic: two uploads of the
/// same tarball started together can both pass the check, and the one which
/// finishes last replaces the other.
#[derive(Debug)]
pub struct TarballUpload {
    writer: Option<DuplexStream>,
    events: mpsc::UnboundedReceiver<UploadEvent>,
    state: watch::Receiver<UploadState>,
    task: JoinHandle<()>,
    shutdown: bool,
    aborted: bool,
}

impl TarballUpload {
    pub(crate) fn spawn(helper: Arc<StorageHelper>, package: &str, file: &str) -> Self {
        let (writer, reader) = io::duplex(PIPE_CAPACITY);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(UploadState::Pending);

        let path = helper.build_blob_path(package, file);
        let span = tracing::debug_span!("write_tarball", %path);
        let task = UploadTask {
            helper,
            path,
            file: file.to_owned(),
            events: events_tx,
            state: state_tx,
        };
        let task = tokio::spawn(task.run(reader).instrument(span));

        Self {
            writer: Some(writer),
            events,
            state,
            task,
            shutdown: false,
            aborted: false,
        }
    }

    /// Wait for the next event. `None` once every event has been delivered,
    /// or after an abort.
    pub async fn next_event(&mut self) -> Option<UploadEvent> {
        if self.aborted {
            return None;
        }
        self.events.recv().await
    }

    /// The current state.
    pub fn state(&self) -> UploadState {
        if self.aborted {
            UploadState::Aborted
        } else {
            *self.state.borrow()
        }
    }

    /// Cancel the upload.
    ///
    /// Stops the backend upload, closes the pipe, and suppresses any further
    /// events. Nothing is stored unless the backend had already finished.
    pub fn abort(&mut self) {
        if self.state().is_terminal() {
            return;
        }
        tracing::warn!("Upload stream has been aborted");
        self.task.abort();
        self.writer = None;
        self.aborted = true;
    }

    /// Mark the end of the data and wait for the outcome.
    pub async fn finish(mut self) -> PackageResult<()> {
        // A closed pipe means the task already ended, the events say why.
        if let Err(err) = self.shutdown().await {
            tracing::trace!("Shutdown after upload ended: {err}");
        }

        while let Some(event) = self.next_event().await {
            match event {
                UploadEvent::Open => {}
                UploadEvent::Success => return Ok(()),
                UploadEvent::Error(error) => return Err(error),
            }
        }

        if self.aborted {
            Err(PackageError::internal("upload aborted"))
        } else {
            Err(PackageError::internal("upload ended without a result"))
        }
    }

    fn writer(&mut self) -> io::Result<Pin<&mut DuplexStream>> {
        match self.writer.as_mut() {
            Some(writer) => Ok(Pin::new(writer)),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "upload aborted")),
        }
    }
}

impl AsyncWrite for TarballUpload {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.writer() {
            Ok(writer) => writer.poll_write(cx, buf),
            Err(err) => Poll::Ready(Err(err)),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.writer() {
            Ok(writer) => writer.poll_flush(cx),
            Err(err) => Poll::Ready(Err(err)),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shutdown = true;
        match self.writer() {
            Ok(writer) => writer.poll_shutdown(cx),
            Err(err) => Poll::Ready(Err(err)),
        }
    }
}

impl Drop for TarballUpload {
    fn drop(&mut self) {
        // Without a shutdown the pipe would read as a complete, truncated tarball.
        if !self.shutdown && !self.state().is_terminal() {
            self.task.abort();
        }
    }
}

struct UploadTask {
    helper: Arc<StorageHelper>,
    path: Utf8PathBuf,
    file: String,
    events: mpsc::UnboundedSender<UploadEvent>,
    state: watch::Sender<UploadState>,
}

impl UploadTask {
    fn emit(&self, event: UploadEvent) {
        let state = match &event {
            UploadEvent::Open => UploadState::Open,
            UploadEvent::Success => UploadState::Success,
            UploadEvent::Error(_) => UploadState::Failed,
        };
        // Receivers may be gone, which only means nobody is listening.
        let _ = self.state.send(state);
        let _ = self.events.send(event);
    }

    async fn run(self, reader: DuplexStream) {
        let bucket = self.helper.bucket();

        match bucket.exists(&self.path).await {
            Ok(false) => {}
            Ok(true) => {
                tracing::debug!(path = %self.path, "Tarball already exists");
                self.emit(UploadEvent::Error(PackageError::already_exists(&self.file)));
                return;
            }
            Err(error) => {
                tracing::error!(path = %self.path, "Checking tarball failed: {error}");
                self.emit(UploadEvent::Error(PackageError::internal(&error)));
                return;
            }
        }

        tracing::info!(path = %self.path, "Uploading tarball");
        self.emit(UploadEvent::Open);

        let options = self.helper.config().upload_options();
        let mut reader = io::BufReader::new(reader);
        let result = bucket.upload(&self.path, &mut reader, &options).await;
        // Close the pipe before reporting, so writers see the failure.
        drop(reader);

        match result {
            Ok(()) => {
                tracing::debug!(path = %self.path, "Tarball uploaded");
                self.emit(UploadEvent::Success);
            }
            Err(error) => {
                tracing::error!(path = %self.path, "Tarball upload failed: {error}");
                self.emit(UploadEvent::Error(PackageError::from_write(&error)));
            }
        }
    }
}

