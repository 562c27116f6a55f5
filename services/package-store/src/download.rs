//! Streaming tarball downloads

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use camino::Utf8PathBuf;
use tokio::io::{self, AsyncRead, AsyncReadExt as _, AsyncWriteExt as _, DuplexStream, ReadBuf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument as _;

use crate::error::{PackageError, PackageResult};
use crate::helper::StorageHelper;
use crate::PIPE_CAPACITY;

/// Events emitted by a [`TarballDownload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    /// The backend declared a length for the tarball. Not sent when the
    /// backend gives no length.
    Open,
    /// The declared size of the tarball, in bytes.
    ContentLength(u64),
    /// Every byte has been handed to the pipe.
    End,
    /// The download failed.
    Error(PackageError),
}

/// Where a download is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    /// Opening the tarball.
    Pending,
    /// Streaming.
    Open,
    /// Complete.
    End,
    /// Failed, see the error event.
    Failed,
    /// Cancelled through [`TarballDownload::abort`].
    Aborted,
}

impl DownloadState {
    /// Whether no further events will follow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::End | DownloadState::Failed | DownloadState::Aborted
        )
    }
}

/// A tarball download in progress.
///
/// Returned before any I/O happens. Read the tarball from the handle; the
/// backend is only read as fast as the handle is, so read the body before
/// waiting on the final event.
#[derive(Debug)]
pub struct TarballDownload {
    reader: Option<DuplexStream>,
    events: mpsc::UnboundedReceiver<DownloadEvent>,
    state: watch::Receiver<DownloadState>,
    task: JoinHandle<()>,
    aborted: bool,
}

impl TarballDownload {
    pub(crate) fn spawn(helper: Arc<StorageHelper>, package: &str, file: &str) -> Self {
        let (writer, reader) = io::duplex(PIPE_CAPACITY);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(DownloadState::Pending);

        let path = helper.build_blob_path(package, file);
        let span = tracing::debug_span!("read_tarball", %path);
        let task = DownloadTask {
            helper,
            path,
            events: events_tx,
            state: state_tx,
        };
        let task = tokio::spawn(task.run(writer).instrument(span));

        Self {
            reader: Some(reader),
            events,
            state,
            task,
            aborted: false,
        }
    }

    /// Wait for the next event. `None` once every event has been delivered,
    /// or after an abort.
    pub async fn next_event(&mut self) -> Option<DownloadEvent> {
        if self.aborted {
            return None;
        }
        self.events.recv().await
    }

    /// The current state.
    pub fn state(&self) -> DownloadState {
        if self.aborted {
            DownloadState::Aborted
        } else {
            *self.state.borrow()
        }
    }

    /// Cancel the download, dropping the source stream.
    pub fn abort(&mut self) {
        if self.state().is_terminal() {
            return;
        }
        tracing::debug!("Aborting tarball download");
        self.task.abort();
        self.reader = None;
        self.aborted = true;
    }

    /// Read the whole tarball, returning the failure if there was one.
    pub async fn into_bytes(mut self) -> PackageResult<Bytes> {
        let mut body = Vec::new();
        let read = self.read_to_end(&mut body).await;

        while let Some(event) = self.next_event().await {
            match event {
                DownloadEvent::Open | DownloadEvent::ContentLength(_) => {}
                DownloadEvent::End => {
                    read.map_err(PackageError::internal)?;
                    return Ok(body.into());
                }
                DownloadEvent::Error(error) => return Err(error),
            }
        }

        if self.aborted {
            Err(PackageError::internal("download aborted"))
        } else {
            Err(PackageError::internal("download ended without a result"))
        }
    }
}

impl AsyncRead for TarballDownload {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.reader.as_mut() {
            Some(reader) => Pin::new(reader).poll_read(cx, buf),
            None => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "download aborted",
            ))),
        }
    }
}

impl Drop for TarballDownload {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct DownloadTask {
    helper: Arc<StorageHelper>,
    path: Utf8PathBuf,
    events: mpsc::UnboundedSender<DownloadEvent>,
    state: watch::Sender<DownloadState>,
}

impl DownloadTask {
    fn emit(&self, event: DownloadEvent) {
        let state = match &event {
            DownloadEvent::Open | DownloadEvent::ContentLength(_) => DownloadState::Open,
            DownloadEvent::End => DownloadState::End,
            DownloadEvent::Error(_) => DownloadState::Failed,
        };
        let _ = self.state.send(state);
        let _ = self.events.send(event);
    }

    async fn run(self, mut writer: DuplexStream) {
        let mut blob = match self.helper.bucket().open(&self.path).await {
            Ok(blob) => blob,
            Err(error) => {
                if error.is_not_found() {
                    tracing::debug!(path = %self.path, "Tarball not found");
                } else {
                    tracing::error!(path = %self.path, "Opening tarball failed: {error}");
                }
                self.emit(DownloadEvent::Error(PackageError::from_read(&error)));
                return;
            }
        };

        match blob.content_length() {
            Some(0) => {
                self.emit(DownloadEvent::Open);
                tracing::error!(path = %self.path, "Tarball is empty");
                self.emit(DownloadEvent::Error(PackageError::internal(
                    "file content empty",
                )));
                return;
            }
            Some(length) => {
                self.emit(DownloadEvent::Open);
                self.emit(DownloadEvent::ContentLength(length));
            }
            None => tracing::trace!(path = %self.path, "No content length declared"),
        }

        let copied = match io::copy(&mut blob, &mut writer).await {
            Ok(copied) => writer.shutdown().await.map(|()| copied),
            Err(error) => Err(error),
        };
        // Release the source before reporting.
        drop(blob);

        match copied {
            Ok(copied) => {
                tracing::debug!(path = %self.path, bytes = copied, "Tarball downloaded");
                self.emit(DownloadEvent::End);
            }
            Err(error) => {
                tracing::error!(path = %self.path, "Tarball download failed: {error}");
                self.emit(DownloadEvent::Error(PackageError::BadRequest(
                    error.to_string(),
                )));
            }
        }
    }
}
