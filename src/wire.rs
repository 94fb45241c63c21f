//! Newline-delimited JSON over TCP. One request per line, one response per
//! line; subscribed booking-change notices are pushed as extra lines. The
//! first line of every connection must be a `hello` carrying the shared
//! token and the hotel name.

use std::sync::Arc;
use std::time::Instant;

use crate::directory::RoomDirectory;

use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use crate::hotel::{Hotel, HotelManager};
use crate::ledger::LedgerError;
use crate::limits::MAX_LINE_LEN;
use crate::model::{Event, Requester, Stay};
use crate::observability;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Hello {
        hotel: String,
        token: String,
    },
    RegisterRoom {
        room_id: Option<Ulid>,
        capacity: u32,
    },
    Reserve {
        room_id: Ulid,
        user_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        guests: u32,
    },
    Cancel {
        booking_id: Ulid,
        requester_id: Ulid,
        #[serde(default)]
        staff: bool,
    },
    Extend {
        booking_id: Ulid,
        requester_id: Ulid,
        #[serde(default)]
        staff: bool,
        new_check_out: NaiveDate,
    },
    Verify {
        booking_id: Ulid,
        passcode: String,
    },
    ListActive {
        room_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
    Subscribe {
        room_id: Ulid,
    },
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub async fn process_connection(
    socket: TcpStream,
    hotels: Arc<HotelManager>,
    token: String,
) -> Result<(), BoxError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    // Startup: the first line must authenticate and name a hotel.
    let hotel = match framed.next().await {
        Some(Ok(line)) => match serde_json::from_str::<Request>(&line) {
            Ok(Request::Hello { hotel, token: presented }) => {
                if presented != token {
                    metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                    framed.send(error_line("unauthorized", "bad token")).await?;
                    return Ok(());
                }
                match hotels.get_or_create(&hotel) {
                    Ok(h) => h,
                    Err(e) => {
                        framed.send(error_line("bad_request", &e.to_string())).await?;
                        return Ok(());
                    }
                }
            }
            _ => {
                framed
                    .send(error_line("bad_request", "expected hello as first line"))
                    .await?;
                return Ok(());
            }
        },
        _ => return Ok(()),
    };
    framed.send(json!({ "ok": true }).to_string()).await?;

    // One room subscription per connection; a new subscribe replaces it.
    let mut subscription: Option<broadcast::Receiver<Event>> = None;

    loop {
        tokio::select! {
            maybe_line = framed.next() => {
                let line = match maybe_line {
                    None => break,           // client hung up
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(line)) => line,
                };
                let response = match serde_json::from_str::<Request>(&line) {
                    Err(e) => error_line("bad_request", &e.to_string()),
                    Ok(Request::Subscribe { room_id }) => {
                        // Only registered rooms get a broadcast channel, or
                        // random ids would grow the hub without bound.
                        if hotel.directory.room_exists(room_id).await {
                            subscription = Some(hotel.notify.subscribe(room_id));
                            json!({ "ok": true, "subscribed": room_id }).to_string()
                        } else {
                            ledger_error_line(&LedgerError::RoomNotFound(room_id))
                        }
                    }
                    Ok(req) => dispatch(&hotel, req).await,
                };
                framed.send(response).await?;
            }
            result = async { subscription.as_mut().expect("guarded by is_some").recv().await },
                if subscription.is_some() =>
            {
                match result {
                    Ok(event) => framed.send(change_notice(&event).to_string()).await?,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        framed
                            .send(json!({ "event": "lagged", "missed": n }).to_string())
                            .await?;
                    }
                    Err(broadcast::error::RecvError::Closed) => subscription = None,
                }
            }
        }
    }

    Ok(())
}

async fn dispatch(hotel: &Hotel, req: Request) -> String {
    let label = observability::request_label(&req);
    let start = Instant::now();
    let result = execute(hotel, req).await;
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => label)
        .record(start.elapsed().as_secs_f64());

    match result {
        Ok(value) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => label, "status" => "ok")
                .increment(1);
            value.to_string()
        }
        Err(e) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => label, "status" => e.code())
                .increment(1);
            ledger_error_line(&e)
        }
    }
}

async fn execute(hotel: &Hotel, req: Request) -> Result<Value, LedgerError> {
    match req {
        Request::Hello { .. } | Request::Subscribe { .. } => {
            // Handled in the connection loop; reaching here is a caller bug.
            Err(LedgerError::LimitExceeded("unexpected control request"))
        }
        Request::RegisterRoom { room_id, capacity } => {
            let room_id = room_id.unwrap_or_else(Ulid::new);
            hotel.register_room(room_id, capacity).await?;
            Ok(json!({ "ok": true, "room_id": room_id }))
        }
        Request::Reserve { room_id, user_id, check_in, check_out, guests } => {
            if check_in >= check_out {
                return Err(LedgerError::InvalidDateRange { check_in, check_out });
            }
            let booking = hotel
                .ledger
                .reserve(room_id, user_id, Stay::new(check_in, check_out), guests)
                .await?;
            Ok(json!({
                "ok": true,
                "booking_id": booking.id,
                "passcode": booking.passcode,
                "status": booking.status,
                "check_in": booking.stay.check_in,
                "check_out": booking.stay.check_out,
            }))
        }
        Request::Cancel { booking_id, requester_id, staff } => {
            let requester = Requester { user_id: requester_id, staff };
            hotel.ledger.cancel(booking_id, requester).await?;
            Ok(json!({ "ok": true, "booking_id": booking_id, "status": "cancelled" }))
        }
        Request::Extend { booking_id, requester_id, staff, new_check_out } => {
            let requester = Requester { user_id: requester_id, staff };
            let booking = hotel.ledger.extend(booking_id, requester, new_check_out).await?;
            Ok(json!({
                "ok": true,
                "booking_id": booking.id,
                "check_in": booking.stay.check_in,
                "check_out": booking.stay.check_out,
            }))
        }
        Request::Verify { booking_id, passcode } => {
            // Never a failure for a bad guess — uniform matched flag only.
            let matched = hotel.ledger.verify(booking_id, &passcode);
            Ok(json!({ "ok": true, "matched": matched }))
        }
        Request::ListActive { room_id, from, to } => {
            if from >= to {
                return Err(LedgerError::InvalidDateRange { check_in: from, check_out: to });
            }
            let bookings = hotel.ledger.list_active(room_id, Stay::new(from, to)).await;
            Ok(json!({ "ok": true, "bookings": bookings }))
        }
    }
}

/// Booking-change notice pushed to subscribers. The passcode never travels
/// this path.
fn change_notice(event: &Event) -> Value {
    match event {
        Event::RoomRegistered { id, capacity } => json!({
            "event": "room_registered",
            "room_id": id,
            "capacity": capacity,
        }),
        Event::BookingCreated { id, room_id, stay, guests, .. } => json!({
            "event": "booking_created",
            "booking_id": id,
            "room_id": room_id,
            "check_in": stay.check_in,
            "check_out": stay.check_out,
            "guests": guests,
        }),
        Event::BookingCancelled { id, room_id } => json!({
            "event": "booking_cancelled",
            "booking_id": id,
            "room_id": room_id,
        }),
        Event::BookingExtended { id, room_id, new_check_out } => json!({
            "event": "booking_extended",
            "booking_id": id,
            "room_id": room_id,
            "check_out": new_check_out,
        }),
    }
}

fn ledger_error_line(e: &LedgerError) -> String {
    json!({
        "ok": false,
        "error": e.code(),
        "message": e.to_string(),
        "retryable": e.retryable(),
    })
    .to_string()
}

fn error_line(code: &str, message: &str) -> String {
    json!({ "ok": false, "error": code, "message": message, "retryable": false }).to_string()
}
