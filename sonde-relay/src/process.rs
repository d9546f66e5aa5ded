//! Decode worker: input queue -> pipeline -> upload queue.
//!
//! Exactly one worker runs, so records reach the upload queue in arrival
//! order.

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sonde_core::{Pipeline, UploadRecord};

use crate::receive::Datagram;
use crate::sinks::Sinks;

pub struct DecodeWorker {
    pipeline: Pipeline,
    sinks: Sinks,
    upload_tx: mpsc::Sender<UploadRecord>,
}

impl DecodeWorker {
    pub fn new(pipeline: Pipeline, sinks: Sinks, upload_tx: mpsc::Sender<UploadRecord>) -> Self {
        DecodeWorker {
            pipeline,
            sinks,
            upload_tx,
        }
    }

    /// Run one datagram through every stage. Rejections are logged and dropped.
    pub fn handle(&self, datagram: &Datagram) {
        self.sinks.raw(&datagram.data, datagram.received_local());

        let processed = match self.pipeline.process(&datagram.data, datagram.received) {
            Ok(processed) => processed,
            Err(e) => {
                debug!(%e, "datagram dropped");
                return;
            }
        };

        self.sinks
            .telemetry(&processed.record.serial, &processed.telemetry);
        self.sinks.reformatted(&processed.record);

        let serial = processed.record.serial.clone();
        match self.upload_tx.try_send(processed.record) {
            Ok(()) => debug!(%serial, "record queued for upload"),
            Err(TrySendError::Full(_)) => warn!(%serial, "upload queue full, record dropped"),
            Err(TrySendError::Closed(_)) => warn!(%serial, "upload queue closed, record dropped"),
        }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<Datagram>, shutdown: CancellationToken) {
        loop {
            let datagram = tokio::select! {
                _ = shutdown.cancelled() => break,
                datagram = rx.recv() => match datagram {
                    Some(datagram) => datagram,
                    None => break,
                },
            };
            self.handle(&datagram);
        }
        debug!("decode worker stopped");
    }
}
