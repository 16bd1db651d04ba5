//! Win32 calls the NT backend can't express through `std`.

use std::ffi::OsStr;
use std::iter::once;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::ptr::{null, null_mut};

use netfs_proto::{FsError, FsResult};
use windows_sys::Win32::Foundation::{ERROR_SUCCESS, LocalFree};
use windows_sys::Win32::Security::Authorization::{
    EXPLICIT_ACCESS_W, GRANT_ACCESS, GetNamedSecurityInfoW, NO_MULTIPLE_TRUSTEE, SE_FILE_OBJECT,
    SetEntriesInAclW, SetNamedSecurityInfoW, TRUSTEE_IS_SID, TRUSTEE_IS_USER, TRUSTEE_W,
};
use windows_sys::Win32::Security::{
    ACL, DACL_SECURITY_INFORMATION, NO_INHERITANCE, OWNER_SECURITY_INFORMATION, PSECURITY_DESCRIPTOR,
    PSID, SUB_CONTAINERS_AND_OBJECTS_INHERIT,
};
use windows_sys::Win32::Storage::FileSystem::{
    FILE_ALL_ACCESS, FILE_FLAG_BACKUP_SEMANTICS, FILE_WRITE_ATTRIBUTES, GetDiskFreeSpaceW,
    GetVolumePathNameW,
};

use super::Geometry;

fn wide(path: &OsStr) -> Vec<u16> {
    path.encode_wide().chain(once(0)).collect()
}

fn win32_error(code: u32, path: &Path) -> FsError {
    FsError::from_io(std::io::Error::from_raw_os_error(code as i32), path)
}

/// Add a full-control ACE for the object's owner to its DACL.
///
/// Runs after the object already exists; the two steps are not atomic.
pub(super) fn grant_owner_full_control(path: &Path, is_dir: bool) -> FsResult<()> {
    let mut name = wide(path.as_os_str());
    let mut owner: PSID = null_mut();
    let mut dacl: *mut ACL = null_mut();
    let mut descriptor: PSECURITY_DESCRIPTOR = null_mut();

    // SAFETY: out-pointers are valid locals; `descriptor` owns `owner` and
    // `dacl` and is released with LocalFree below.
    let status = unsafe {
        GetNamedSecurityInfoW(
            name.as_mut_ptr(),
            SE_FILE_OBJECT,
            OWNER_SECURITY_INFORMATION | DACL_SECURITY_INFORMATION,
            &mut owner,
            null_mut(),
            &mut dacl,
            null_mut(),
            &mut descriptor,
        )
    };
    if status != ERROR_SUCCESS {
        return Err(win32_error(status, path));
    }

    let access = EXPLICIT_ACCESS_W {
        grfAccessPermissions: FILE_ALL_ACCESS,
        grfAccessMode: GRANT_ACCESS,
        grfInheritance: if is_dir {
            SUB_CONTAINERS_AND_OBJECTS_INHERIT
        } else {
            NO_INHERITANCE
        },
        Trustee: TRUSTEE_W {
            pMultipleTrustee: null_mut(),
            MultipleTrusteeOperation: NO_MULTIPLE_TRUSTEE,
            TrusteeForm: TRUSTEE_IS_SID,
            TrusteeType: TRUSTEE_IS_USER,
            ptstrName: owner as *mut u16,
        },
    };

    let mut merged: *mut ACL = null_mut();
    // SAFETY: `access` and `dacl` stay alive for the call; `merged` is
    // allocated by the system and freed with LocalFree.
    let status = unsafe { SetEntriesInAclW(1, &access, dacl, &mut merged) };
    if status != ERROR_SUCCESS {
        unsafe { LocalFree(descriptor as _) };
        return Err(win32_error(status, path));
    }

    // SAFETY: `merged` is a valid ACL from SetEntriesInAclW.
    let status = unsafe {
        SetNamedSecurityInfoW(
            name.as_mut_ptr(),
            SE_FILE_OBJECT,
            DACL_SECURITY_INFORMATION,
            null_mut(),
            null_mut(),
            merged,
            null(),
        )
    };

    unsafe {
        LocalFree(merged as _);
        LocalFree(descriptor as _);
    }

    if status != ERROR_SUCCESS {
        return Err(win32_error(status, path));
    }
    Ok(())
}

/// Open a file or directory with just enough access to set its times.
pub(super) fn open_for_times(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::windows::fs::OpenOptionsExt;

    std::fs::OpenOptions::new()
        .access_mode(FILE_WRITE_ATTRIBUTES)
        .custom_flags(FILE_FLAG_BACKUP_SEMANTICS)
        .open(path)
}

/// Cluster geometry of the volume holding `path`.
pub(super) fn geometry(path: &Path) -> FsResult<Geometry> {
    let name = wide(path.as_os_str());
    let mut volume = vec![0u16; 261];

    // SAFETY: `volume` has room for the length we pass.
    let ok = unsafe { GetVolumePathNameW(name.as_ptr(), volume.as_mut_ptr(), volume.len() as u32) };
    if ok == 0 {
        return Err(FsError::from_io(std::io::Error::last_os_error(), path));
    }

    let mut sectors_per_cluster = 0u32;
    let mut bytes_per_sector = 0u32;
    let mut free_clusters = 0u32;
    let mut total_clusters = 0u32;

    // SAFETY: `volume` is NUL-terminated by GetVolumePathNameW; the counters
    // are valid out-pointers.
    let ok = unsafe {
        GetDiskFreeSpaceW(
            volume.as_ptr(),
            &mut sectors_per_cluster,
            &mut bytes_per_sector,
            &mut free_clusters,
            &mut total_clusters,
        )
    };
    if ok == 0 {
        return Err(FsError::from_io(std::io::Error::last_os_error(), path));
    }

    Ok(Geometry {
        cluster_size: u64::from(sectors_per_cluster) * u64::from(bytes_per_sector),
        total_clusters: u64::from(total_clusters),
        free_clusters: u64::from(free_clusters),
    })
}
