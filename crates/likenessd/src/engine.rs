use std::thread::JoinHandle;

use likeness_core::{
    DeleteReport, Detection, FaceAssignment, FaceFilter, FaceId, Gallery, GalleryError,
    GroupReport, MediaRef, PersonId, PersonSummary, Store,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Per-detection outcome of an ingest request.
pub type IngestResult = Vec<Result<FaceAssignment, GalleryError>>;

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub version: &'static str,
    pub persons: usize,
    pub faces: usize,
    pub unassigned_faces: usize,
}

/// Messages sent from callers to the engine thread.
enum EngineRequest {
    Ingest {
        media: MediaRef,
        detections: Vec<Detection>,
        cancel: CancellationToken,
        reply: oneshot::Sender<IngestResult>,
    },
    Group {
        cancel: CancellationToken,
        reply: oneshot::Sender<Result<GroupReport, GalleryError>>,
    },
    DeleteMedia {
        media: MediaRef,
        reply: oneshot::Sender<Result<DeleteReport, GalleryError>>,
    },
    DeleteFace {
        face_id: FaceId,
        reply: oneshot::Sender<Result<DeleteReport, GalleryError>>,
    },
    Rename {
        person_id: PersonId,
        name: Option<String>,
        reply: oneshot::Sender<Result<(), GalleryError>>,
    },
    Merge {
        keep: PersonId,
        absorb: PersonId,
        cancel: CancellationToken,
        reply: oneshot::Sender<Result<usize, GalleryError>>,
    },
    People {
        reply: oneshot::Sender<Result<Vec<PersonSummary>, GalleryError>>,
    },
    Status {
        reply: oneshot::Sender<Result<EngineStatus, GalleryError>>,
    },
}

/// Clone-safe handle to the engine thread.
///
/// Every request is executed on that one thread, in arrival order, so a
/// match and the person creation that may follow it never interleave with
/// another caller's.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Match and store every detection from one media item.
    pub async fn ingest(
        &self,
        media: MediaRef,
        detections: Vec<Detection>,
        cancel: CancellationToken,
    ) -> Result<IngestResult, EngineError> {
        self.request(|reply| EngineRequest::Ingest {
            media,
            detections,
            cancel,
            reply,
        })
        .await
    }

    /// Run a reconciliation pass.
    pub async fn group_faces(&self, cancel: CancellationToken) -> Result<GroupReport, EngineError> {
        Ok(self
            .request(|reply| EngineRequest::Group { cancel, reply })
            .await??)
    }

    pub async fn delete_media(&self, media: MediaRef) -> Result<DeleteReport, EngineError> {
        Ok(self
            .request(|reply| EngineRequest::DeleteMedia { media, reply })
            .await??)
    }

    pub async fn delete_face(&self, face_id: FaceId) -> Result<DeleteReport, EngineError> {
        Ok(self
            .request(|reply| EngineRequest::DeleteFace { face_id, reply })
            .await??)
    }

    pub async fn rename_person(
        &self,
        person_id: PersonId,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        Ok(self
            .request(|reply| EngineRequest::Rename {
                person_id,
                name,
                reply,
            })
            .await??)
    }

    pub async fn merge_persons(
        &self,
        keep: PersonId,
        absorb: PersonId,
        cancel: CancellationToken,
    ) -> Result<usize, EngineError> {
        Ok(self
            .request(|reply| EngineRequest::Merge {
                keep,
                absorb,
                cancel,
                reply,
            })
            .await??)
    }

    pub async fn people(&self) -> Result<Vec<PersonSummary>, EngineError> {
        Ok(self.request(|reply| EngineRequest::People { reply }).await??)
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        Ok(self.request(|reply| EngineRequest::Status { reply }).await??)
    }
}

/// Spawn the engine on a dedicated OS thread that owns the gallery.
///
/// The thread exits once every [`EngineHandle`] has been dropped; join the
/// returned handle to wait for the request in flight to finish.
pub fn spawn_engine<S>(
    gallery: Gallery<S>,
    regroup_after_ingest: bool,
) -> Result<(EngineHandle, JoinHandle<()>), EngineError>
where
    S: Store + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    let thread = std::thread::Builder::new()
        .name("likeness-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                handle(&gallery, regroup_after_ingest, req);
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok((EngineHandle { tx }, thread))
}

fn handle<S: Store>(gallery: &Gallery<S>, regroup_after_ingest: bool, req: EngineRequest) {
    match req {
        EngineRequest::Ingest {
            media,
            detections,
            cancel,
            reply,
        } => {
            let result = gallery.ingest(&media, &detections, &cancel);
            if regroup_after_ingest && !cancel.is_cancelled() {
                if let Err(e) = gallery.group_faces(&cancel) {
                    tracing::warn!(error = %e, media = %media, "post-ingest reconciliation failed");
                }
            }
            let _ = reply.send(result);
        }
        EngineRequest::Group { cancel, reply } => {
            let _ = reply.send(gallery.group_faces(&cancel));
        }
        EngineRequest::DeleteMedia { media, reply } => {
            let _ = reply.send(gallery.delete_media(&media));
        }
        EngineRequest::DeleteFace { face_id, reply } => {
            let _ = reply.send(gallery.delete_face(face_id));
        }
        EngineRequest::Rename {
            person_id,
            name,
            reply,
        } => {
            let _ = reply.send(gallery.rename_person(person_id, name.as_deref()));
        }
        EngineRequest::Merge {
            keep,
            absorb,
            cancel,
            reply,
        } => {
            let _ = reply.send(gallery.merge_persons(keep, absorb, &cancel));
        }
        EngineRequest::People { reply } => {
            let _ = reply.send(gallery.people());
        }
        EngineRequest::Status { reply } => {
            let _ = reply.send(status(gallery));
        }
    }
}

fn status<S: Store>(gallery: &Gallery<S>) -> Result<EngineStatus, GalleryError> {
    let store = gallery.store();
    Ok(EngineStatus {
        version: env!("CARGO_PKG_VERSION"),
        persons: store.persons()?.len(),
        faces: store.count_faces(&FaceFilter::All)?,
        unassigned_faces: store.count_faces(&FaceFilter::Unassigned)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use likeness_core::{BoundingBox, Descriptor, GalleryConfig, MemoryStore, Person, TieBreak};

    fn engine() -> EngineHandle {
        let gallery = Gallery::new(
            MemoryStore::new(),
            GalleryConfig {
                max_distance: 0.6,
                dimension: 2,
                tie_break: TieBreak::First,
            },
        );
        spawn_engine(gallery, true).unwrap().0
    }

    fn det(values: [f32; 2]) -> Detection {
        Detection {
            descriptor: Descriptor::new(values.to_vec()),
            bbox: BoundingBox::default(),
            thumbnail: None,
        }
    }

    #[tokio::test]
    async fn test_concurrent_ingests_share_one_person() {
        let engine = engine();
        let mut tasks = Vec::new();
        for i in 0..8 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                engine
                    .ingest(
                        MediaRef::new(format!("m{i}")),
                        vec![det([1.0, 0.01 * i as f32])],
                        CancellationToken::new(),
                    )
                    .await
                    .unwrap()
            }));
        }
        for t in tasks {
            assert!(t.await.unwrap()[0].is_ok());
        }

        let status = engine.status().await.unwrap();
        assert_eq!(status.persons, 1);
        assert_eq!(status.faces, 8);
        assert_eq!(status.unassigned_faces, 0);
    }

    #[tokio::test]
    async fn test_rename_and_list_people() {
        let engine = engine();
        let res = engine
            .ingest(MediaRef::new("m1"), vec![det([0.0, 1.0])], CancellationToken::new())
            .await
            .unwrap();
        let person = res[0].as_ref().unwrap().person_id;

        engine.rename_person(person, Some("Lin".into())).await.unwrap();
        let people = engine.people().await.unwrap();
        assert_eq!(people.len(), 1);
        assert_eq!(people[0].name.as_deref(), Some("Lin"));
    }

    #[tokio::test]
    async fn test_gallery_errors_pass_through() {
        let engine = engine();
        let err = engine.rename_person(PersonId::new(), None).await.unwrap_err();
        assert!(matches!(err, EngineError::Gallery(GalleryError::PersonNotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_media_cascades() {
        let engine = engine();
        engine
            .ingest(MediaRef::new("m1"), vec![det([1.0, 0.0])], CancellationToken::new())
            .await
            .unwrap();
        let report = engine.delete_media(MediaRef::new("m1")).await.unwrap();
        assert_eq!(report.faces_deleted, 1);
        assert_eq!(engine.status().await.unwrap().persons, 0);
    }

    #[tokio::test]
    async fn test_stale_dimension_keeps_engine_alive() {
        let store = MemoryStore::new();
        store
            .insert_person(&Person::seeded(Descriptor::new(vec![1.0, 0.0])))
            .unwrap();
        let gallery = Gallery::new(
            store,
            GalleryConfig {
                max_distance: 0.6,
                dimension: 3,
                tie_break: TieBreak::First,
            },
        );
        let (engine, _thread) = spawn_engine(gallery, true).unwrap();

        let res = engine
            .ingest(
                MediaRef::new("m1"),
                vec![Detection {
                    descriptor: Descriptor::new(vec![1.0, 0.0, 0.0]),
                    bbox: BoundingBox::default(),
                    thumbnail: None,
                }],
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(matches!(res[0], Err(GalleryError::StoreUnavailable(_))));

        let status = engine.status().await.unwrap();
        assert_eq!(status.persons, 1);
        assert_eq!(status.faces, 0);
    }

    #[tokio::test]
    async fn test_thread_exits_when_handles_drop() {
        let gallery = Gallery::new(MemoryStore::new(), GalleryConfig::default());
        let (engine, thread) = spawn_engine(gallery, false).unwrap();
        engine.status().await.unwrap();
        drop(engine);
        tokio::task::spawn_blocking(move || thread.join())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_group_on_empty_gallery() {
        let engine = engine();
        let report = engine.group_faces(CancellationToken::new()).await.unwrap();
        assert_eq!(report, GroupReport::default());
    }
}
