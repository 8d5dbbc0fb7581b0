//! C4 — session handler. One task per accepted TCP connection (spawned by
//! `listener::run`). Reads frames, dispatches by `inst` code, then polls the
//! device's pending `instruction` and emits any matching downlink.
//!
//! Grounded on `examples/original_source/server.go`'s
//! `handleRequestFromClient` (dispatch table + reconciler block), with
//! async line reading per `other_examples/.../p-toni-sim-corp__drivers-tcp-
//! line-native-src-lib.rs.rs`'s `BufReader` + `read_line` loop.

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use crate::codec::{self, UplinkFrame};
use crate::error::SessionError;
use crate::store::{self, RegisterOutcome, StateStore};
use crate::units;

/// Drives one connection to completion. Returns once the peer closes the
/// socket or a socket I/O error occurs; store errors and malformed frames
/// are handled internally and never end the session (spec.md §7), except
/// the one case spec.md §4.4 calls out explicitly: a storage `Error` on
/// `Q0` registration ends the session (not the process).
pub async fn run(stream: TcpStream, peer: std::net::SocketAddr, store: StateStore) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    let mut imei: Option<String> = None;

    loop {
        line.clear();
        let n = match reader.read_line(&mut line).await {
            Ok(n) => n,
            Err(e) => {
                warn!(%peer, error = %e, "socket read error, ending session");
                return;
            }
        };
        if n == 0 {
            debug!(%peer, ?imei, "peer closed connection");
            return;
        }

        match codec::parse_line(&line) {
            Some(frame) => {
                debug!(%peer, imei = frame.imei(), inst = frame.inst(), "uplink");
                imei = Some(frame.imei().to_string());
                match dispatch_uplink(&frame, &store, &mut write_half).await {
                    Ok(()) => {}
                    Err(e) if e.is_fatal_to_session() => {
                        warn!(%peer, imei = frame.imei(), error = %e, "ending session on I/O error");
                        return;
                    }
                    Err(e) => {
                        warn!(%peer, imei = frame.imei(), error = %e, "dispatch failed, session continues");
                        if matches!(e, SessionError::Store(_)) && frame.inst() == "Q0" {
                            // spec.md §4.4: an EnsureRegistered storage Error closes
                            // the session (not the process).
                            return;
                        }
                    }
                }
            }
            None => {
                debug!(%peer, line = line.trim(), "dropping malformed frame");
            }
        }

        if let Some(imei) = &imei {
            if let Err(e) = reconcile(imei, &store, &mut write_half).await {
                if e.is_fatal_to_session() {
                    warn!(%peer, %imei, error = %e, "ending session on I/O error during reconcile");
                    return;
                }
                warn!(%peer, %imei, error = %e, "reconcile failed, session continues");
            }
        }
    }
}

async fn write_downlink<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    imei: &str,
    body: &str,
) -> Result<(), SessionError> {
    let frame = codec::encode_downlink(imei, body);
    writer.write_all(&frame).await?;
    info!(imei, body, "downlink");
    Ok(())
}

async fn dispatch_uplink<W: AsyncWriteExt + Unpin>(
    frame: &UplinkFrame,
    store: &StateStore,
    writer: &mut W,
) -> Result<(), SessionError> {
    let imei = frame.imei();

    match frame.inst() {
        "Q0" => dispatch_q0(imei, store, writer).await,
        "H0" => dispatch_h0(frame, store).await,
        "R0" => dispatch_r0(frame, imei, writer).await,
        "W0" => write_downlink(writer, imei, "V0,2").await,
        "L0" => dispatch_lock_ack(frame, imei, store, writer, "L0").await,
        "L1" => dispatch_lock_ack(frame, imei, store, writer, "L1").await,
        "S1" => dispatch_s1(imei, store).await,
        "S6" => dispatch_s6(frame, imei, store, writer).await,
        "D0" => dispatch_d0(frame, imei, store).await,
        other => {
            debug!(imei, inst = other, "no dispatch handler for this instruction");
            Ok(())
        }
    }
}

/// C6 — registration/provisioning. On `Success`, two downlinks are sent
/// immediately, sequentially, with no wait for ack in between (spec.md
/// §4.5). Idempotent: a reconnect simply repeats it and gets `Exists`.
async fn dispatch_q0<W: AsyncWriteExt + Unpin>(
    imei: &str,
    store: &StateStore,
    writer: &mut W,
) -> Result<(), SessionError> {
    info!(imei, "registration request");
    match store.ensure_registered(imei).await {
        Ok(RegisterOutcome::Success) => {
            info!(imei, "registered scooter, pushing default configuration");
            write_downlink(writer, imei, "S5,2,2,10,10").await?;
            write_downlink(writer, imei, "D1,10").await?;
            Ok(())
        }
        Ok(RegisterOutcome::Exists) => {
            debug!(imei, "already registered");
            Ok(())
        }
        Err(e) => Err(SessionError::Store(e)),
    }
}

async fn dispatch_h0(frame: &UplinkFrame, store: &StateStore) -> Result<(), SessionError> {
    let (status, drive_volt, net_signal, power, charging) =
        match (frame.field(4), frame.field(5), frame.field(6), frame.field(7), frame.field(8)) {
            (Some(a), Some(b), Some(c), Some(d), Some(e)) => (a, b, c, d, e),
            _ => {
                debug!(imei = frame.imei(), "H0 frame too short, dropping");
                return Ok(());
            }
        };

    let power: i64 = power.parse().unwrap_or(0);
    let charging = codec::strip_terminator(charging);
    let patch = store::patch([
        ("power", json!(power)),
        ("locked", json!(units::scooter_status(status))),
        ("drivervolt", json!(units::convert_voltage(drive_volt))),
        ("networksignal", json!(net_signal)),
        ("chargingstatus", json!(units::charging_status(charging))),
    ]);
    store.patch_lock(frame.imei(), patch).await.map_err(SessionError::Store)
}

async fn dispatch_r0<W: AsyncWriteExt + Unpin>(
    frame: &UplinkFrame,
    imei: &str,
    writer: &mut W,
) -> Result<(), SessionError> {
    let (oper, key) = match (frame.field(4), frame.field(5)) {
        (Some(o), Some(k)) => (o, k),
        _ => {
            debug!(imei, "R0 frame too short, dropping");
            return Ok(());
        }
    };

    let key = codec::strip_terminator(key);
    let body = r0_reply_body(oper, key, &units::make_timestamp());
    write_downlink(writer, imei, &body).await
}

/// Pure body-construction for the `R0` device-initiated lock/unlock reply
/// (spec.md §4.4): `oper=="1"` echoes a lock confirmation, anything else an
/// unlock confirmation carrying the server's timestamp. `key` must already
/// have its frame terminator stripped — embedding it raw would double up
/// with the `#<checksum>` the encoder appends.
fn r0_reply_body(oper: &str, key: &str, ts: &str) -> String {
    if oper == "1" {
        format!("L1,{key}")
    } else {
        format!("L0,{key},0,{ts}")
    }
}

/// Pure mapping from a device's lock/unlock acknowledgement `oper` code to
/// the `instruction` terminal state spec.md §4.4 requires: `"0"` succeeds,
/// anything else fails (Testable property 3 & 4). `oper` must already have
/// its frame terminator stripped — `L0`/`L1` acks carry `oper` as their last
/// field, so the raw comma-split value is `"0#"`/`"1#"`, never a bare `"0"`.
fn lock_ack_result(oper: &str) -> &'static str {
    if oper == "0" {
        "Done"
    } else {
        "Fail"
    }
}

/// Pure threshold check backing the `S6` slow-mode trigger (Testable
/// property 5): strictly under 10% battery.
fn is_low_battery(power: i64) -> bool {
    power < 10
}

async fn dispatch_lock_ack<W: AsyncWriteExt + Unpin>(
    frame: &UplinkFrame,
    imei: &str,
    store: &StateStore,
    writer: &mut W,
    echo: &str,
) -> Result<(), SessionError> {
    let oper = match frame.field(4) {
        Some(o) => o,
        None => {
            debug!(imei, echo, "lock-ack frame too short, dropping");
            return Ok(());
        }
    };
    let oper = codec::strip_terminator(oper);

    write_downlink(writer, imei, echo).await?;

    let patch = store::patch([("instruction", json!(lock_ack_result(oper)))]);
    store.patch_lock(imei, patch).await.map_err(SessionError::Store)
}

async fn dispatch_s1(imei: &str, store: &StateStore) -> Result<(), SessionError> {
    let patch = store::patch([("instruction", json!("Done"))]);
    store.patch_lock(imei, patch).await.map_err(SessionError::Store)
}

async fn dispatch_s6<W: AsyncWriteExt + Unpin>(
    frame: &UplinkFrame,
    imei: &str,
    store: &StateStore,
    writer: &mut W,
) -> Result<(), SessionError> {
    let fields = match (
        frame.field(4),
        frame.field(5),
        frame.field(6),
        frame.field(7),
        frame.field(8),
        frame.field(9),
        frame.field(10),
        frame.field(11),
    ) {
        (Some(p), Some(sm), Some(cs), Some(ch), Some(b1), Some(b2), Some(lk), Some(ns)) => {
            (p, sm, cs, ch, b1, b2, lk, ns)
        }
        _ => {
            debug!(imei, "S6 frame too short, dropping");
            return Ok(());
        }
    };
    let (power_raw, speed_mode, cur_speed, charging, bat1, bat2, locked, net_signal_raw) = fields;

    let power: i64 = power_raw.parse().unwrap_or(0);
    let net_signal = codec::strip_terminator(net_signal_raw);

    if is_low_battery(power) {
        info!(imei, power, "low battery, pushing slow-mode profile");
        write_downlink(writer, imei, "S4,1,1,1,2,2,6,6,6").await?;
    }

    let patch = store::patch([
        ("power", json!(power)),
        ("locked", json!(units::scooter_status(locked))),
        ("networksignal", json!(net_signal)),
        ("speedmode", json!(speed_mode)),
        ("curspeed", json!(format!("{cur_speed}km/h"))),
        ("chargingstatus", json!(units::charging_status(charging))),
        ("bat1volt", json!(units::convert_bat_voltage(bat1))),
        ("bat2volt", json!(units::convert_bat_voltage(bat2))),
    ]);
    store.patch_lock(imei, patch).await.map_err(SessionError::Store)
}

async fn dispatch_d0(frame: &UplinkFrame, imei: &str, store: &StateStore) -> Result<(), SessionError> {
    let (positioning, lat_raw, lon_raw) = match (frame.field(6), frame.field(7), frame.field(9)) {
        (Some(p), Some(la), Some(lo)) => (p, la, lo),
        _ => {
            debug!(imei, "D0 frame too short, dropping");
            return Ok(());
        }
    };

    let patch = store::patch([
        ("positioning", json!(positioning)),
        ("latitude", json!(units::calculate_lat(lat_raw))),
        ("longitude", json!(units::calculate_lon(lon_raw))),
    ]);
    store.patch_lock(imei, patch).await.map_err(SessionError::Store)
}

/// Polls the pending `instruction` field and emits the matching downlink.
/// The server never clears `instruction` itself (spec.md §4.4) — the
/// device's follow-up ack (`L0`/`L1`/`S1`) drives the `Done`/`Fail`
/// transition, and until it arrives this re-emits the same downlink on
/// every subsequent uplink, which is the intended retry-until-acked
/// behavior on an unreliable cellular link.
async fn reconcile<W: AsyncWriteExt + Unpin>(
    imei: &str,
    store: &StateStore,
    writer: &mut W,
) -> Result<(), SessionError> {
    let lock = match store.load_lock(imei).await.map_err(SessionError::Store)? {
        Some(lock) => lock,
        None => {
            let err = SessionError::UnknownImei(imei.to_string());
            // spec.md §7: "Unknown imei on lookup: logged at error level;
            // the session continues."
            error!(imei, error = %err, "imei not found during reconcile, session continues");
            return Ok(());
        }
    };

    for body in reconcile_bodies(&lock.instruction, &units::make_timestamp()) {
        write_downlink(writer, imei, &body).await?;
    }
    Ok(())
}

/// Pure operator-instruction-to-downlink mapping (spec.md §4.4's reconciler
/// table). Emits zero, one, or two downlink bodies in order; the server
/// never clears `instruction` here — that's left to the device's follow-up
/// ack, per spec.md §4.4.
fn reconcile_bodies(instruction: &str, ts: &str) -> Vec<String> {
    match instruction {
        "lock" => vec![format!("R0,1,20,0,{ts}")],
        "unlock" => vec![format!("R0,0,20,0,{ts}")],
        "reserve" => vec!["V0,1".to_string(), "S1,10".to_string()],
        "cancel" => vec!["S1,11".to_string()],
        "alarm" => vec!["V0,2".to_string()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn r0_reply_echoes_lock_or_unlock_by_oper() {
        assert_eq!(r0_reply_body("1", "9", "ts"), "L1,9");
        assert_eq!(r0_reply_body("0", "9", "ts"), "L0,9,0,ts");
        // spec.md §4.4: anything other than "1" takes the unlock branch.
        assert_eq!(r0_reply_body("weird", "9", "ts"), "L0,9,0,ts");
    }

    #[test]
    fn r0_reply_on_a_real_frame_requires_stripping_keys_terminator() {
        // `key` is R0's last comma-split field, so it carries the frame
        // terminator raw; embedding it unstripped would double up with the
        // encoder's own `#<checksum>` (codec::encode_downlink).
        let frame = codec::parse_line("*SCOR,OM,X,R0,1,9#\n").unwrap();
        let raw_key = frame.field(5).unwrap();
        assert_eq!(raw_key, "9#");
        let body = r0_reply_body(frame.field(4).unwrap(), codec::strip_terminator(raw_key), "ts");
        assert_eq!(body, "L1,9");
    }

    #[test]
    fn lock_ack_result_maps_oper_zero_to_done() {
        // Testable properties 3 & 4.
        assert_eq!(lock_ack_result("0"), "Done");
        assert_eq!(lock_ack_result("1"), "Fail");
        assert_eq!(lock_ack_result("anything-else"), "Fail");
    }

    #[test]
    fn lock_ack_result_on_a_real_frame_field_requires_stripping_the_terminator() {
        // spec.md §8 seed scenario: the device's ack `*SCOR,OM,X,L0,0#\n`
        // comma-splits oper to "0#", not "0" — dispatch_lock_ack must strip
        // the terminator before calling lock_ack_result, or "Done" is
        // unreachable.
        let frame = codec::parse_line("*SCOR,OM,X,L0,0#\n").unwrap();
        let raw_oper = frame.field(4).unwrap();
        assert_eq!(raw_oper, "0#");
        assert_eq!(lock_ack_result(codec::strip_terminator(raw_oper)), "Done");

        let fail_frame = codec::parse_line("*SCOR,OM,X,L0,1#\n").unwrap();
        let raw_oper = fail_frame.field(4).unwrap();
        assert_eq!(lock_ack_result(codec::strip_terminator(raw_oper)), "Fail");
    }

    #[test]
    fn low_battery_threshold_is_strictly_under_ten() {
        // Testable property 5.
        assert!(is_low_battery(9));
        assert!(!is_low_battery(10));
        assert!(!is_low_battery(50));
    }

    #[test]
    fn reconcile_bodies_cover_every_operator_verb() {
        assert_eq!(reconcile_bodies("lock", "170000"), vec!["R0,1,20,0,170000"]);
        assert_eq!(reconcile_bodies("unlock", "170000"), vec!["R0,0,20,0,170000"]);
        assert_eq!(reconcile_bodies("reserve", "170000"), vec!["V0,1", "S1,10"]);
        assert_eq!(reconcile_bodies("cancel", "170000"), vec!["S1,11"]);
        assert_eq!(reconcile_bodies("alarm", "170000"), vec!["V0,2"]);
    }

    #[test]
    fn reconcile_bodies_empty_for_done_fail_or_empty_instruction() {
        // The server never re-reads a terminal state it wrote (Invariant 2).
        assert!(reconcile_bodies("", "ts").is_empty());
        assert!(reconcile_bodies("Done", "ts").is_empty());
        assert!(reconcile_bodies("Fail", "ts").is_empty());
    }
}
