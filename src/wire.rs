use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::debug;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::facility::FacilityManager;
use crate::model::*;
use crate::observability;

const MAX_LINE_LEN: usize = 64 * 1024;

/// First line of every session: which facility the client wants.
#[derive(Debug, Serialize, Deserialize)]
pub struct Hello {
    pub facility: String,
}

/// One command per line, JSON-encoded, tagged by `cmd`. Ids are optional on
/// creation commands; the server mints a ULID when the client omits one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    CreateKennel {
        #[serde(default)]
        id: Option<Ulid>,
        number: String,
        size: KennelSize,
        #[serde(default)]
        notes: Option<String>,
    },
    UpdateKennel {
        id: Ulid,
        number: String,
        size: KennelSize,
        #[serde(default)]
        notes: Option<String>,
    },
    DeleteKennel {
        id: Ulid,
    },
    GetKennel {
        id: Ulid,
    },
    ListKennels,
    RegisterDog {
        #[serde(default)]
        id: Option<Ulid>,
        name: String,
        breed: String,
    },
    UpdateDog {
        id: Ulid,
        name: String,
        breed: String,
    },
    RemoveDog {
        id: Ulid,
    },
    GetDog {
        id: Ulid,
    },
    ListDogs,
    CreateBooking {
        #[serde(default)]
        id: Option<Ulid>,
        dog_id: Ulid,
        kennel_id: Ulid,
        start: Ms,
        end: Ms,
        #[serde(default)]
        special_requirements: Option<String>,
        #[serde(default)]
        total_cost_cents: i64,
    },
    UpdateBooking {
        id: Ulid,
        dog_id: Ulid,
        kennel_id: Ulid,
        start: Ms,
        end: Ms,
        #[serde(default)]
        special_requirements: Option<String>,
        #[serde(default)]
        total_cost_cents: i64,
    },
    SetBookingStatus {
        id: Ulid,
        status: BookingStatus,
    },
    DeleteBooking {
        id: Ulid,
    },
    GetBooking {
        id: Ulid,
    },
    ListBookings,
    KennelBookings {
        kennel_id: Ulid,
        #[serde(default)]
        exclude_status: Option<BookingStatus>,
    },
    CheckAvailability {
        kennel_id: Ulid,
        start: Ms,
        end: Ms,
        #[serde(default)]
        exclude: Option<Ulid>,
    },
    AvailableKennels {
        start: Ms,
        end: Ms,
    },
    Subscribe {
        kennel_id: Ulid,
    },
    Unsubscribe {
        kennel_id: Ulid,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    Ok,
    Created { id: Ulid },
    Kennel { kennel: KennelInfo },
    Kennels { kennels: Vec<KennelInfo> },
    Dog { dog: Dog },
    Dogs { dogs: Vec<Dog> },
    Booking { booking: Booking },
    Bookings { bookings: Vec<Booking> },
    Available { available: bool },
    Deleted { id: Ulid },
    Event { event: Event },
    Error { message: String },
}

/// Execute one command against a facility's engine. Subscribe/Unsubscribe
/// carry per-connection state and are handled by the session loop instead.
pub async fn dispatch(engine: &Engine, cmd: Command) -> Result<Reply, EngineError> {
    match cmd {
        Command::CreateKennel { id, number, size, notes } => {
            let id = id.unwrap_or_else(Ulid::new);
            engine.create_kennel(id, number, size, notes).await?;
            Ok(Reply::Created { id })
        }
        Command::UpdateKennel { id, number, size, notes } => {
            engine.update_kennel(id, number, size, notes).await?;
            Ok(Reply::Ok)
        }
        Command::DeleteKennel { id } => {
            engine.delete_kennel(id).await?;
            Ok(Reply::Deleted { id })
        }
        Command::GetKennel { id } => {
            let kennel = engine
                .kennel_info_for(id)
                .await
                .ok_or(EngineError::NotFound(id))?;
            Ok(Reply::Kennel { kennel })
        }
        Command::ListKennels => Ok(Reply::Kennels {
            kennels: engine.list_kennels().await,
        }),
        Command::RegisterDog { id, name, breed } => {
            let id = id.unwrap_or_else(Ulid::new);
            engine.register_dog(id, name, breed).await?;
            Ok(Reply::Created { id })
        }
        Command::UpdateDog { id, name, breed } => {
            engine.update_dog(id, name, breed).await?;
            Ok(Reply::Ok)
        }
        Command::RemoveDog { id } => {
            engine.remove_dog(id).await?;
            Ok(Reply::Deleted { id })
        }
        Command::GetDog { id } => {
            let dog = engine.get_dog(&id).ok_or(EngineError::NotFound(id))?;
            Ok(Reply::Dog { dog })
        }
        Command::ListDogs => Ok(Reply::Dogs {
            dogs: engine.list_dogs(),
        }),
        Command::CreateBooking {
            id,
            dog_id,
            kennel_id,
            start,
            end,
            special_requirements,
            total_cost_cents,
        } => {
            let id = id.unwrap_or_else(Ulid::new);
            // Raw Span so malformed dates surface as a validation error.
            let span = Span { start, end };
            let booking = engine
                .create_booking(id, dog_id, kennel_id, span, special_requirements, total_cost_cents)
                .await?;
            Ok(Reply::Booking { booking })
        }
        Command::UpdateBooking {
            id,
            dog_id,
            kennel_id,
            start,
            end,
            special_requirements,
            total_cost_cents,
        } => {
            let span = Span { start, end };
            let booking = engine
                .update_booking(id, dog_id, kennel_id, span, special_requirements, total_cost_cents)
                .await?;
            Ok(Reply::Booking { booking })
        }
        Command::SetBookingStatus { id, status } => {
            let booking = engine.set_booking_status(id, status).await?;
            Ok(Reply::Booking { booking })
        }
        Command::DeleteBooking { id } => {
            engine.delete_booking(id).await?;
            Ok(Reply::Deleted { id })
        }
        Command::GetBooking { id } => {
            let booking = engine
                .get_booking(id)
                .await
                .ok_or(EngineError::NotFound(id))?;
            Ok(Reply::Booking { booking })
        }
        Command::ListBookings => Ok(Reply::Bookings {
            bookings: engine.list_bookings().await,
        }),
        Command::KennelBookings { kennel_id, exclude_status } => Ok(Reply::Bookings {
            bookings: engine.bookings_for_kennel(kennel_id, exclude_status).await,
        }),
        Command::CheckAvailability { kennel_id, start, end, exclude } => {
            let available = engine
                .check_availability(kennel_id, Span { start, end }, exclude)
                .await?;
            Ok(Reply::Available { available })
        }
        Command::AvailableKennels { start, end } => Ok(Reply::Kennels {
            kennels: engine.available_kennels(Span { start, end }).await,
        }),
        Command::Subscribe { .. } | Command::Unsubscribe { .. } => Ok(Reply::Ok),
    }
}

fn error_reply(e: &EngineError) -> Reply {
    Reply::Error { message: e.to_string() }
}

fn codec_err(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        LinesCodecError::MaxLineLengthExceeded => {
            io::Error::new(io::ErrorKind::InvalidData, "line too long")
        }
    }
}

async fn send_reply<S>(framed: &mut Framed<S, LinesCodec>, reply: &Reply) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let line = serde_json::to_string(reply).map_err(io::Error::other)?;
    framed.send(line).await.map_err(codec_err)
}

/// Drive one client session: Hello handshake, then a command/reply loop.
/// Subscribed kennel events interleave with replies as `Event` lines.
pub async fn process_connection<S>(stream: S, manager: Arc<FacilityManager>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    let Some(hello_line) = framed.next().await else {
        return Ok(());
    };
    let hello_line = hello_line.map_err(codec_err)?;
    let hello: Hello = match serde_json::from_str(&hello_line) {
        Ok(h) => h,
        Err(e) => {
            let reply = Reply::Error { message: format!("bad hello: {e}") };
            send_reply(&mut framed, &reply).await?;
            return Ok(());
        }
    };
    let engine = match manager.get_or_create(&hello.facility).await {
        Ok(engine) => engine,
        Err(e) => {
            let reply = Reply::Error { message: format!("facility error: {e}") };
            send_reply(&mut framed, &reply).await?;
            return Ok(());
        }
    };
    send_reply(&mut framed, &Reply::Ok).await?;

    // Broadcast receivers forward into one channel so the loop has a single
    // event source to select on.
    let (event_tx, mut event_rx) = mpsc::channel::<Event>(64);
    let mut subs: HashMap<Ulid, JoinHandle<()>> = HashMap::new();

    let result = session_loop(&mut framed, &engine, &event_tx, &mut subs, &mut event_rx).await;

    for (_, handle) in subs {
        handle.abort();
    }
    result
}

async fn session_loop<S>(
    framed: &mut Framed<S, LinesCodec>,
    engine: &Arc<Engine>,
    event_tx: &mpsc::Sender<Event>,
    subs: &mut HashMap<Ulid, JoinHandle<()>>,
    event_rx: &mut mpsc::Receiver<Event>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            line = framed.next() => {
                let Some(line) = line else { return Ok(()) };
                let line = line.map_err(codec_err)?;
                let cmd: Command = match serde_json::from_str(&line) {
                    Ok(cmd) => cmd,
                    Err(e) => {
                        let reply = Reply::Error { message: format!("bad command: {e}") };
                        send_reply(framed, &reply).await?;
                        continue;
                    }
                };

                match cmd {
                    Command::Subscribe { kennel_id } => {
                        let mut rx = engine.notify.subscribe(kennel_id);
                        let tx = event_tx.clone();
                        let handle = tokio::spawn(async move {
                            // Lagged receivers drop events; the client can
                            // refetch state if that matters to it.
                            while let Ok(event) = rx.recv().await {
                                if tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                        });
                        if let Some(old) = subs.insert(kennel_id, handle) {
                            old.abort();
                        }
                        send_reply(framed, &Reply::Ok).await?;
                    }
                    Command::Unsubscribe { kennel_id } => {
                        if let Some(handle) = subs.remove(&kennel_id) {
                            handle.abort();
                        }
                        send_reply(framed, &Reply::Ok).await?;
                    }
                    cmd => {
                        let label = observability::command_label(&cmd);
                        let start = Instant::now();
                        let result = dispatch(engine, cmd).await;
                        metrics::histogram!(
                            observability::COMMAND_DURATION_SECONDS,
                            "command" => label
                        )
                        .record(start.elapsed().as_secs_f64());

                        match result {
                            Ok(reply) => {
                                metrics::counter!(
                                    observability::COMMANDS_TOTAL,
                                    "command" => label, "status" => "ok"
                                )
                                .increment(1);
                                send_reply(framed, &reply).await?;
                            }
                            Err(e) => {
                                metrics::counter!(
                                    observability::COMMANDS_TOTAL,
                                    "command" => label, "status" => "error"
                                )
                                .increment(1);
                                debug!("command {label} failed: {e}");
                                send_reply(framed, &error_reply(&e)).await?;
                                if !e.is_recoverable() {
                                    return Err(io::Error::other(e.to_string()));
                                }
                            }
                        }
                    }
                }
            }
            Some(event) = event_rx.recv() => {
                send_reply(framed, &Reply::Event { event }).await?;
            }
        }
    }
}
