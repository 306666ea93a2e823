//! Datagram decryption and binary frame decoding.
//!
//! Every datagram is Salsa20-encrypted with a fixed key and a nonce derived
//! from a 32-bit word the packet carries in the clear at 0x40. The decoded
//! layout is fixed-offset little-endian, 296 bytes.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use model::{Corners, Flags, Frame};
use pitwall_cipher::Salsa20;

pub const FRAME_SIZE: usize = 0x128; // 296
pub const MAGIC: u32 = 0x4737_5330; // "0S7G"
pub const IV_OFFSET: usize = 0x40;
pub const IV_XOR: u32 = 0xDEAD_BEAF;

/// The cipher key is the first 32 bytes of the interface version string.
pub const CIPHER_KEY: &[u8] = b"Simulator Interface Packet GT7 ver 0.0";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    TooShort,
    BadMagic,
}

fn cipher_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    key.copy_from_slice(&CIPHER_KEY[..32]);
    key
}

/// Decrypt a raw datagram in place of a fresh buffer. The four nonce bytes
/// are not part of the encrypted stream and are restored from the
/// ciphertext afterwards.
pub fn decrypt(raw: &[u8]) -> Result<Vec<u8>, Rejection> {
    if raw.len() < FRAME_SIZE {
        return Err(Rejection::TooShort);
    }
    let iv1 = u32::from_le_bytes(raw[IV_OFFSET..IV_OFFSET + 4].try_into().unwrap());
    let iv2 = iv1 ^ IV_XOR;
    let mut nonce = [0u8; 8];
    nonce[..4].copy_from_slice(&iv2.to_le_bytes());
    nonce[4..].copy_from_slice(&iv1.to_le_bytes());

    let mut plain = raw.to_vec();
    Salsa20::new(&cipher_key(), &nonce).apply_keystream(&mut plain);
    plain[IV_OFFSET..IV_OFFSET + 4].copy_from_slice(&raw[IV_OFFSET..IV_OFFSET + 4]);

    let magic = u32::from_le_bytes(plain[..4].try_into().unwrap());
    if magic != MAGIC {
        return Err(Rejection::BadMagic);
    }
    Ok(plain)
}

/// Full decode: decrypt, verify magic, parse the fixed layout.
pub fn decode(raw: &[u8]) -> Result<Frame, Rejection> {
    let plain = decrypt(raw)?;
    Ok(parse(&plain))
}

fn read_vec3(c: &mut Cursor<&[u8]>) -> [f32; 3] {
    let mut v = [0f32; 3];
    for slot in v.iter_mut() {
        *slot = c.read_f32::<LittleEndian>().unwrap_or(0.0);
    }
    v
}

fn read_corners(c: &mut Cursor<&[u8]>) -> Corners<f32> {
    Corners {
        fl: c.read_f32::<LittleEndian>().unwrap_or(0.0),
        fr: c.read_f32::<LittleEndian>().unwrap_or(0.0),
        rl: c.read_f32::<LittleEndian>().unwrap_or(0.0),
        rr: c.read_f32::<LittleEndian>().unwrap_or(0.0),
    }
}

/// Parse a decrypted, magic-verified buffer. Offsets per the interface
/// layout; the buffer is already length-checked by `decrypt`.
fn parse(plain: &[u8]) -> Frame {
    let mut c = Cursor::new(plain);

    c.set_position(0x04);
    let position = read_vec3(&mut c);
    let velocity = read_vec3(&mut c);
    let rotation = read_vec3(&mut c);
    let rel_orientation_to_north = c.read_f32::<LittleEndian>().unwrap_or(0.0);
    let angular_velocity = read_vec3(&mut c);
    let body_height = c.read_f32::<LittleEndian>().unwrap_or(0.0);
    let engine_rpm = c.read_f32::<LittleEndian>().unwrap_or(0.0);

    c.set_position(0x44);
    let fuel_level = c.read_f32::<LittleEndian>().unwrap_or(0.0);
    let fuel_capacity = c.read_f32::<LittleEndian>().unwrap_or(0.0);
    let speed_mps = c.read_f32::<LittleEndian>().unwrap_or(0.0);
    let boost = c.read_f32::<LittleEndian>().unwrap_or(0.0);
    let oil_pressure = c.read_f32::<LittleEndian>().unwrap_or(0.0);
    let water_temp = c.read_f32::<LittleEndian>().unwrap_or(0.0);
    let oil_temp = c.read_f32::<LittleEndian>().unwrap_or(0.0);
    let tyre_temp = read_corners(&mut c);

    let packet_id = c.read_u32::<LittleEndian>().unwrap_or(0);
    let lap_count = c.read_i16::<LittleEndian>().unwrap_or(0);
    let laps_in_race = c.read_i16::<LittleEndian>().unwrap_or(0);
    let best_lap_ms = c.read_i32::<LittleEndian>().unwrap_or(-1);
    let last_lap_ms = c.read_i32::<LittleEndian>().unwrap_or(-1);
    let day_progression_ms = c.read_i32::<LittleEndian>().unwrap_or(0);
    let qualifying_position = c.read_i16::<LittleEndian>().unwrap_or(-1);
    let pre_race_num_cars = c.read_i16::<LittleEndian>().unwrap_or(-1);
    let rpm_alert_min = c.read_i16::<LittleEndian>().unwrap_or(0);
    let rpm_alert_max = c.read_i16::<LittleEndian>().unwrap_or(0);
    let calculated_max_speed = c.read_i16::<LittleEndian>().unwrap_or(0);
    let flags = Flags::from_word(c.read_u16::<LittleEndian>().unwrap_or(0));

    // low nibble current gear, high nibble suggested
    let gear_byte = c.read_u8().unwrap_or(0);
    let throttle_byte = c.read_u8().unwrap_or(0);
    let brake_byte = c.read_u8().unwrap_or(0);

    c.set_position(0xA4);
    let wheel_rps = read_corners(&mut c);
    let tyre_radius = read_corners(&mut c);
    let suspension_height = read_corners(&mut c);

    c.set_position(0xF4);
    let clutch_pedal = c.read_f32::<LittleEndian>().unwrap_or(0.0);
    let clutch_engagement = c.read_f32::<LittleEndian>().unwrap_or(0.0);
    let rpm_after_clutch = c.read_f32::<LittleEndian>().unwrap_or(0.0);
    let transmission_top_speed = c.read_f32::<LittleEndian>().unwrap_or(0.0);
    let mut gear_ratios = [0f32; 8];
    for slot in gear_ratios.iter_mut() {
        *slot = c.read_f32::<LittleEndian>().unwrap_or(0.0);
    }
    let car_code = c.read_i32::<LittleEndian>().unwrap_or(-1);

    Frame {
        packet_id,
        position,
        velocity,
        rotation,
        rel_orientation_to_north,
        angular_velocity,
        body_height,
        engine_rpm,
        fuel_level,
        fuel_capacity,
        speed_mps,
        boost,
        oil_pressure,
        water_temp,
        oil_temp,
        tyre_temp,
        lap_count,
        laps_in_race,
        best_lap_ms,
        last_lap_ms,
        day_progression_ms,
        qualifying_position,
        pre_race_num_cars,
        rpm_alert_min,
        rpm_alert_max,
        calculated_max_speed,
        flags,
        current_gear: gear_byte & 0x0F,
        suggested_gear: gear_byte >> 4,
        throttle_pct: throttle_byte as f32 * 100.0 / 255.0,
        brake_pct: brake_byte as f32 * 100.0 / 255.0,
        wheel_rps,
        tyre_radius,
        suspension_height,
        clutch_pedal,
        clutch_engagement,
        rpm_after_clutch,
        transmission_top_speed,
        gear_ratios,
        car_code,
    }
}

/// Test fixture: encode frames the way the console does, so the decoder can
/// be exercised without a real peer.
#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use byteorder::{LittleEndian, WriteBytesExt};
    use std::io::Cursor;

    /// Lay a frame out at its wire offsets, encrypt the whole buffer, and
    /// leave the nonce word in the clear.
    pub(crate) fn encode(frame: &Frame, iv1: u32) -> Vec<u8> {
        let mut plain = vec![0u8; FRAME_SIZE];
        let mut c = Cursor::new(&mut plain[..]);
        c.write_u32::<LittleEndian>(MAGIC).unwrap();
        for v in frame.position.iter().chain(&frame.velocity).chain(&frame.rotation) {
            c.write_f32::<LittleEndian>(*v).unwrap();
        }
        c.write_f32::<LittleEndian>(frame.rel_orientation_to_north).unwrap();
        for v in &frame.angular_velocity {
            c.write_f32::<LittleEndian>(*v).unwrap();
        }
        c.write_f32::<LittleEndian>(frame.body_height).unwrap();
        c.write_f32::<LittleEndian>(frame.engine_rpm).unwrap();
        c.write_u32::<LittleEndian>(iv1).unwrap(); // 0x40
        c.write_f32::<LittleEndian>(frame.fuel_level).unwrap();
        c.write_f32::<LittleEndian>(frame.fuel_capacity).unwrap();
        c.write_f32::<LittleEndian>(frame.speed_mps).unwrap();
        c.write_f32::<LittleEndian>(frame.boost).unwrap();
        c.write_f32::<LittleEndian>(frame.oil_pressure).unwrap();
        c.write_f32::<LittleEndian>(frame.water_temp).unwrap();
        c.write_f32::<LittleEndian>(frame.oil_temp).unwrap();
        for (_, t) in frame.tyre_temp.labelled() {
            c.write_f32::<LittleEndian>(*t).unwrap();
        }
        c.write_u32::<LittleEndian>(frame.packet_id).unwrap();
        c.write_i16::<LittleEndian>(frame.lap_count).unwrap();
        c.write_i16::<LittleEndian>(frame.laps_in_race).unwrap();
        c.write_i32::<LittleEndian>(frame.best_lap_ms).unwrap();
        c.write_i32::<LittleEndian>(frame.last_lap_ms).unwrap();
        c.write_i32::<LittleEndian>(frame.day_progression_ms).unwrap();
        c.write_i16::<LittleEndian>(frame.qualifying_position).unwrap();
        c.write_i16::<LittleEndian>(frame.pre_race_num_cars).unwrap();
        c.write_i16::<LittleEndian>(frame.rpm_alert_min).unwrap();
        c.write_i16::<LittleEndian>(frame.rpm_alert_max).unwrap();
        c.write_i16::<LittleEndian>(frame.calculated_max_speed).unwrap();
        c.write_u16::<LittleEndian>(frame.flags.to_word()).unwrap();
        c.write_u8(frame.current_gear & 0x0F | (frame.suggested_gear << 4)).unwrap();
        c.write_u8((frame.throttle_pct * 255.0 / 100.0).round() as u8).unwrap();
        c.write_u8((frame.brake_pct * 255.0 / 100.0).round() as u8).unwrap();
        c.set_position(0xA4);
        for corners in [&frame.wheel_rps, &frame.tyre_radius, &frame.suspension_height] {
            for (_, v) in corners.labelled() {
                c.write_f32::<LittleEndian>(*v).unwrap();
            }
        }
        c.set_position(0xF4);
        c.write_f32::<LittleEndian>(frame.clutch_pedal).unwrap();
        c.write_f32::<LittleEndian>(frame.clutch_engagement).unwrap();
        c.write_f32::<LittleEndian>(frame.rpm_after_clutch).unwrap();
        c.write_f32::<LittleEndian>(frame.transmission_top_speed).unwrap();
        for r in &frame.gear_ratios {
            c.write_f32::<LittleEndian>(*r).unwrap();
        }
        c.write_i32::<LittleEndian>(frame.car_code).unwrap();
        drop(c);

        // encrypt the whole buffer, then put the nonce word back in the clear
        let iv2 = iv1 ^ IV_XOR;
        let mut nonce = [0u8; 8];
        nonce[..4].copy_from_slice(&iv2.to_le_bytes());
        nonce[4..].copy_from_slice(&iv1.to_le_bytes());
        Salsa20::new(&cipher_key(), &nonce).apply_keystream(&mut plain);
        plain[IV_OFFSET..IV_OFFSET + 4].copy_from_slice(&iv1.to_le_bytes());
        plain
    }

    pub(crate) fn sample_frame() -> Frame {
        Frame {
            packet_id: 91_411,
            position: [120.5, -4.25, 887.0],
            velocity: [41.2, 0.1, 12.8],
            rotation: [0.01, 0.94, -0.02],
            rel_orientation_to_north: 0.35,
            angular_velocity: [0.0, 0.12, 0.0],
            body_height: 0.11,
            engine_rpm: 6450.0,
            fuel_level: 38.5,
            fuel_capacity: 60.0,
            speed_mps: 43.25,
            boost: 1.4,
            oil_pressure: 5.2,
            water_temp: 85.0,
            oil_temp: 92.0,
            tyre_temp: Corners { fl: 78.5, fr: 80.0, rl: 71.25, rr: 72.0 },
            lap_count: 4,
            laps_in_race: 10,
            best_lap_ms: 101_823,
            last_lap_ms: 102_350,
            day_progression_ms: 3_600_000,
            qualifying_position: 3,
            pre_race_num_cars: 12,
            rpm_alert_min: 7000,
            rpm_alert_max: 7500,
            calculated_max_speed: 282,
            flags: Flags {
                on_track: true,
                in_gear: true,
                has_turbo: true,
                tcs_active: true,
                ..Default::default()
            },
            current_gear: 4,
            suggested_gear: 3,
            throttle_pct: 40.0, // exact under the 0..255 wire byte
            brake_pct: 0.0,
            wheel_rps: Corners { fl: 21.0, fr: 21.1, rl: 20.6, rr: 20.7 },
            tyre_radius: Corners { fl: 0.33, fr: 0.33, rl: 0.34, rr: 0.34 },
            suspension_height: Corners { fl: 0.08, fr: 0.081, rl: 0.09, rr: 0.089 },
            clutch_pedal: 0.0,
            clutch_engagement: 1.0,
            rpm_after_clutch: 6450.0,
            transmission_top_speed: 3.2,
            gear_ratios: [3.2, 2.4, 1.9, 1.5, 1.2, 1.0, 0.0, 0.0],
            car_code: 3_341,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{encode, sample_frame};
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encode_decode_round_trip() {
        let frame = sample_frame();
        let raw = encode(&frame, 0x00C0_FFEE);
        assert_eq!(raw.len(), FRAME_SIZE);
        let decoded = decode(&raw).expect("valid frame");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn fields_survive_nonce_restore() {
        // fuel level sits right after the clear nonce word; a decoder that
        // forgets the restore step corrupts everything up to 0x44
        let frame = sample_frame();
        let raw = encode(&frame, 0xDEAD_0001);
        let decoded = decode(&raw).unwrap();
        assert_eq!(decoded.fuel_level, 38.5);
        assert_eq!(decoded.engine_rpm, 6450.0);
    }

    #[test]
    fn short_datagram_is_rejected() {
        assert_eq!(decode(&[0u8; 64]), Err(Rejection::TooShort));
        assert_eq!(decode(&[]), Err(Rejection::TooShort));
        assert_eq!(decode(&vec![0u8; FRAME_SIZE - 1]), Err(Rejection::TooShort));
    }

    #[test]
    fn corrupted_magic_is_rejected() {
        let mut raw = encode(&sample_frame(), 7);
        raw[0] ^= 0xFF; // first ciphertext byte feeds the magic word
        assert_eq!(decode(&raw), Err(Rejection::BadMagic));
    }

    #[test]
    fn gear_nibbles_split() {
        let mut frame = sample_frame();
        frame.current_gear = 2;
        frame.suggested_gear = 5;
        let decoded = decode(&encode(&frame, 1)).unwrap();
        assert_eq!(decoded.current_gear, 2);
        assert_eq!(decoded.suggested_gear, 5);
    }

    proptest! {
        /// Any datagram either decodes to a magic-verified frame or is
        /// rejected; nothing panics.
        #[test]
        fn decode_total_over_arbitrary_bytes(raw in proptest::collection::vec(any::<u8>(), 0..512)) {
            let _ = decode(&raw);
        }

        #[test]
        fn random_full_size_datagrams_almost_never_pass_magic(
            raw in proptest::collection::vec(any::<u8>(), FRAME_SIZE..=FRAME_SIZE)
        ) {
            match decode(&raw) {
                Ok(_) | Err(Rejection::BadMagic) => {}
                Err(Rejection::TooShort) => prop_assert!(false, "full-size datagram flagged short"),
            }
        }
    }
}
