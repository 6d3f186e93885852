/*! Read GLM-L2-LCFA NetCDF files through the netCDF C library. */

use super::{GlmFile, RawEvent, RawFlash, RawGroup};
use crate::{SatFlashError, SatFlashResult};
use chrono::{DateTime, Duration, TimeZone, Utc};
use libc::{c_char, c_double, c_int, c_void, size_t};
use once_cell::sync::OnceCell;
use std::{
    ffi::{CStr, CString},
    sync::Mutex,
};

static_assertions::assert_eq_size!(c_double, f64);

macro_rules! check_error {
    ($name:expr, $code:expr) => {
        check_netcdf_error($name, $code, file!(), line!())
    };
}

/// Open the bytes of a NetCDF file in memory and pull out all three tiers.
pub(super) fn read_netcdf(name: &str, bytes: &[u8]) -> SatFlashResult<GlmFile> {
    let path_str = CString::new(name).map_err(|err| SatFlashError::malformed(name, err))?;

    // The library may read from the buffer until the file is closed.
    let mut buf: Vec<u8> = bytes.to_vec();

    let lock = get_netcdf_lock()
        .lock()
        .map_err(|_| SatFlashError::malformed(name, "netCDF lock poisoned"))?;

    let mut file_id: c_int = -1;
    unsafe {
        let status = nc_open_mem(
            path_str.as_ptr(),
            NC_NOWRITE,
            buf.len(),
            buf.as_mut_ptr() as *mut c_void,
            &mut file_id as *mut c_int,
        );
        check_error!(name, status)?;
    }

    let handle = NcHandle(file_id);
    let res = read_tiers(name, &handle);

    drop(handle);
    drop(lock);
    drop(buf);

    res
}

fn read_tiers(name: &str, handle: &NcHandle) -> SatFlashResult<GlmFile> {
    let h = handle.0;

    // Offsets in the file are seconds after product_time, which is seconds since J2000.
    let product_time = read_variable(name, h, "product_time")?
        .first()
        .copied()
        .ok_or_else(|| SatFlashError::malformed(name, "empty product_time"))?;
    let base = j2000() + seconds(name, product_time)?;

    let flash_ids = read_variable(name, h, "flash_id")?;
    let flash_times = read_variable(name, h, "flash_time_offset_of_first_event")?;
    let flash_lats = read_variable(name, h, "flash_lat")?;
    let flash_lons = read_variable(name, h, "flash_lon")?;
    let flash_energies = read_variable(name, h, "flash_energy")?;
    same_lengths(
        name,
        "flash",
        &[
            &flash_ids,
            &flash_times,
            &flash_lats,
            &flash_lons,
            &flash_energies,
        ],
    )?;

    let group_ids = read_variable(name, h, "group_id")?;
    let group_parents = read_variable(name, h, "group_parent_flash_id")?;
    let group_times = read_variable(name, h, "group_time_offset")?;
    let group_lats = read_variable(name, h, "group_lat")?;
    let group_lons = read_variable(name, h, "group_lon")?;
    let group_energies = read_variable(name, h, "group_energy")?;
    same_lengths(
        name,
        "group",
        &[&group_ids, &group_parents, &group_times, &group_lats, &group_lons, &group_energies],
    )?;

    let event_ids = read_variable(name, h, "event_id")?;
    let event_parents = read_variable(name, h, "event_parent_group_id")?;
    let event_times = read_variable(name, h, "event_time_offset")?;
    let event_lats = read_variable(name, h, "event_lat")?;
    let event_lons = read_variable(name, h, "event_lon")?;
    let event_energies = read_variable(name, h, "event_energy")?;
    same_lengths(
        name,
        "event",
        &[&event_ids, &event_parents, &event_times, &event_lats, &event_lons, &event_energies],
    )?;

    let mut flashes = Vec::with_capacity(flash_ids.len());
    for i in 0..flash_ids.len() {
        flashes.push(RawFlash {
            id: flash_ids[i] as i64,
            time: base + seconds(name, flash_times[i])?,
            lat: flash_lats[i],
            lon: flash_lons[i],
            energy: flash_energies[i],
        });
    }

    let mut groups = Vec::with_capacity(group_ids.len());
    for i in 0..group_ids.len() {
        groups.push(RawGroup {
            id: group_ids[i] as i64,
            parent_flash_id: group_parents[i] as i64,
            time: base + seconds(name, group_times[i])?,
            lat: group_lats[i],
            lon: group_lons[i],
            energy: group_energies[i],
        });
    }

    let mut events = Vec::with_capacity(event_ids.len());
    for i in 0..event_ids.len() {
        events.push(RawEvent {
            id: event_ids[i] as i64,
            parent_group_id: event_parents[i] as i64,
            time: base + seconds(name, event_times[i])?,
            lat: event_lats[i],
            lon: event_lons[i],
            energy: event_energies[i],
        });
    }

    Ok(GlmFile::new(name, flashes, groups, events))
}

fn j2000() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn seconds(name: &str, secs: f64) -> SatFlashResult<Duration> {
    if !secs.is_finite() {
        return Err(SatFlashError::malformed(name, "missing time value"));
    }

    Ok(Duration::microseconds((secs * 1.0e6).round() as i64))
}

fn same_lengths(name: &str, tier: &str, vars: &[&Vec<f64>]) -> SatFlashResult<()> {
    let len = vars.first().map(|v| v.len()).unwrap_or(0);
    if vars.iter().any(|v| v.len() != len) {
        return Err(SatFlashError::malformed(
            name,
            format!("{} variables have mismatched lengths", tier),
        ));
    }

    Ok(())
}

/// Read a whole variable as doubles, unpacked.
///
/// Fill values become NaN. Packed integer variables flagged `_Unsigned` are reinterpreted before
/// `scale_factor` and `add_offset` are applied.
fn read_variable(name: &str, ncid: c_int, vname: &str) -> SatFlashResult<Vec<f64>> {
    let cname = CString::new(vname).map_err(|err| SatFlashError::malformed(name, err))?;

    let mut vals: Vec<f64>;
    let mut xtype: c_int = 0;
    let mut scale_factor: f64 = 1.0;
    let mut add_offset: f64 = 0.0;
    let mut fill_value: f64 = f64::NAN;

    unsafe {
        let mut varid: c_int = -1;
        check_error!(name, nc_inq_varid(ncid, cname.as_ptr(), &mut varid as *mut c_int))?;

        let mut ndims: c_int = 0;
        check_error!(name, nc_inq_varndims(ncid, varid, &mut ndims as *mut c_int))?;

        let mut dimids: Vec<c_int> = vec![-1; ndims.max(0) as usize];
        check_error!(name, nc_inq_vardimid(ncid, varid, dimids.as_mut_ptr()))?;

        let mut len: usize = 1;
        for dimid in dimids {
            let mut dimlen: size_t = 0;
            check_error!(name, nc_inq_dimlen(ncid, dimid, &mut dimlen as *mut size_t))?;
            len *= dimlen;
        }

        vals = Vec::with_capacity(len);
        check_error!(name, nc_get_var_double(ncid, varid, vals.as_mut_ptr()))?;
        vals.set_len(len);

        check_error!(name, nc_inq_vartype(ncid, varid, &mut xtype as *mut c_int))?;

        let scale_str = b"scale_factor\0".as_ptr() as *const c_char;
        let offset_str = b"add_offset\0".as_ptr() as *const c_char;
        let fill_str = b"_FillValue\0".as_ptr() as *const c_char;
        check_attribute(name, nc_get_att_double(ncid, varid, scale_str, &mut scale_factor))?;
        check_attribute(name, nc_get_att_double(ncid, varid, offset_str, &mut add_offset))?;
        check_attribute(name, nc_get_att_double(ncid, varid, fill_str, &mut fill_value))?;
    }

    let wrap = if is_unsigned(ncid, name, &cname)? {
        match xtype {
            NC_BYTE => 256.0,
            NC_SHORT => 65_536.0,
            NC_INT => 4_294_967_296.0,
            _ => 0.0,
        }
    } else {
        0.0
    };

    for val in vals.iter_mut() {
        *val = if *val == fill_value {
            f64::NAN
        } else {
            let raw = if *val < 0.0 { *val + wrap } else { *val };
            raw * scale_factor + add_offset
        };
    }

    Ok(vals)
}

fn is_unsigned(ncid: c_int, name: &str, cname: &CStr) -> SatFlashResult<bool> {
    let attr = b"_Unsigned\0".as_ptr() as *const c_char;

    unsafe {
        let mut varid: c_int = -1;
        check_error!(name, nc_inq_varid(ncid, cname.as_ptr(), &mut varid as *mut c_int))?;

        let mut len: size_t = 0;
        let status = nc_inq_attlen(ncid, varid, attr, &mut len as *mut size_t);
        if status == NC_ENOTATT {
            return Ok(false);
        }
        check_error!(name, status)?;

        let mut text: Vec<u8> = vec![0; len];
        check_error!(name, nc_get_att_text(ncid, varid, attr, text.as_mut_ptr() as *mut c_char))?;

        Ok(text.eq_ignore_ascii_case(b"true"))
    }
}

/// Closes the file when it goes out of scope, the global lock must be held.
struct NcHandle(c_int);

impl Drop for NcHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = nc_close(self.0);
        }
    }
}

static NETCDF_GLOBAL_LOCK: OnceCell<Mutex<()>> = OnceCell::new();

fn get_netcdf_lock() -> &'static Mutex<()> {
    NETCDF_GLOBAL_LOCK.get_or_init(|| Mutex::new(()))
}

const NC_NOWRITE: c_int = 0x0000;
const NC_NOERR: c_int = 0;
const NC_ENOTATT: c_int = -43;

const NC_BYTE: c_int = 1;
const NC_SHORT: c_int = 3;
const NC_INT: c_int = 4;

fn check_netcdf_error(
    name: &str,
    status_code: c_int,
    file: &'static str,
    line: u32,
) -> SatFlashResult<()> {
    if status_code == NC_NOERR {
        return Ok(());
    }

    let msg = unsafe { CStr::from_ptr(nc_strerror(status_code)) };
    Err(SatFlashError::malformed(
        name,
        format!("{}[{}] netCDF error: {}", file, line, msg.to_string_lossy()),
    ))
}

fn check_attribute(name: &str, status_code: c_int) -> SatFlashResult<()> {
    if status_code == NC_ENOTATT {
        Ok(())
    } else {
        check_error!(name, status_code)
    }
}

#[link(name = "netcdf")]
extern "C" {
    fn nc_open_mem(
        name: *const c_char,
        mode: c_int,
        buf_size: size_t,
        buf: *mut c_void,
        ncidp: *mut c_int,
    ) -> c_int;
    fn nc_close(handle: c_int) -> c_int;

    fn nc_strerror(code: c_int) -> *const c_char;

    fn nc_inq_dimlen(handle: c_int, dimid: c_int, rv: *mut size_t) -> c_int;
    fn nc_inq_varid(handle: c_int, name: *const c_char, varid: *mut c_int) -> c_int;
    fn nc_inq_varndims(handle: c_int, varid: c_int, ndims: *mut c_int) -> c_int;
    fn nc_inq_vardimid(handle: c_int, varid: c_int, dimids: *mut c_int) -> c_int;
    fn nc_inq_vartype(handle: c_int, varid: c_int, xtype: *mut c_int) -> c_int;
    fn nc_inq_attlen(handle: c_int, varid: c_int, name: *const c_char, len: *mut size_t) -> c_int;
    fn nc_get_att_double(
        handle: c_int,
        varid: c_int,
        name: *const c_char,
        val: *mut c_double,
    ) -> c_int;
    fn nc_get_att_text(handle: c_int, varid: c_int, name: *const c_char, val: *mut c_char)
        -> c_int;
    fn nc_get_var_double(handle: c_int, varid: c_int, vals: *mut c_double) -> c_int;
}
