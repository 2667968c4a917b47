//! `create`, `remove`, `open`, `close`, `filesize`, `read`, `write`,
//! `seek`, `tell`, `chdir`, `mkdir`, `readdir`, `isdir`, `inumber` (§4.8).
//!
//! Each function here already has its path/buffer arguments resolved to
//! kernel-visible values — fetching them out of user memory is the
//! dispatcher's job (`is_valid`/`copy_in`/`copy_out` in the parent
//! module), kept separate so these read like the policy they implement.

extern crate alloc;

use crate::fs::{FileSystem, Path};
use crate::process::Process;
use crate::syscall::Console;

/// `create(path, initial_size)`. The initial size is a hint only: this
/// filesystem grows files sparsely on demand, so it is accepted and
/// ignored, matching the Open Question resolution recorded for directory
/// pre-sizing.
pub fn create(fs: &FileSystem<'_>, process: &Process, path: &Path) -> bool {
    match fs.create_file(&process.cwd.lock(), path) {
        Ok(inode) => {
            fs.inodes.close(inode);
            true
        }
        Err(_) => false,
    }
}

pub fn remove(fs: &FileSystem<'_>, process: &Process, path: &Path) -> bool {
    fs.remove(&process.cwd.lock(), path).is_ok()
}

/// Returns the new descriptor number, or -1 on failure (path doesn't
/// resolve, or the descriptor table is full).
pub fn open(fs: &FileSystem<'_>, process: &Process, path: &Path) -> i32 {
    match fs.resolve(&process.cwd.lock(), path) {
        Ok(inode) => match process.fds.lock().alloc(inode) {
            Some(fd) => fd,
            None => -1,
        },
        Err(_) => -1,
    }
}

pub fn close(fs: &FileSystem<'_>, process: &Process, fd: i32) {
    if let Some(inode) = process.fds.lock().close(fd) {
        fs.inodes.close(inode);
    }
}

pub fn filesize(process: &Process, fd: i32) -> i32 {
    process
        .fds
        .lock()
        .inode(fd)
        .map(|inode| inode.length() as i32)
        .unwrap_or(-1)
}

/// Reads at most `buf.len()` bytes into `buf`, advancing this
/// descriptor's cursor. Descriptor 0 reads from `console` instead of the
/// filesystem; descriptor 1 cannot be read.
pub fn read(fs: &FileSystem<'_>, process: &Process, console: &dyn Console, fd: i32, buf: &mut [u8]) -> i32 {
    if process.fds.lock().is_stdin(fd) {
        return console.read(buf) as i32;
    }
    if process.fds.lock().is_stdout(fd) {
        return -1;
    }
    let fds = process.fds.lock();
    let (inode, position) = match (fds.inode(fd), fds.position(fd)) {
        (Some(inode), Some(position)) => (alloc::sync::Arc::clone(inode), position),
        _ => return -1,
    };
    drop(fds);
    let n = fs.inodes.read_at(&inode, buf, position);
    process.fds.lock().set_position(fd, position + n as u32);
    n as i32
}

/// Writes `buf`, advancing this descriptor's cursor. Descriptor 1 writes
/// to `console`; descriptor 0 cannot be written.
pub fn write(fs: &FileSystem<'_>, process: &Process, console: &dyn Console, fd: i32, buf: &[u8]) -> i32 {
    if process.fds.lock().is_stdout(fd) {
        console.write(buf);
        return buf.len() as i32;
    }
    if process.fds.lock().is_stdin(fd) {
        return -1;
    }
    let fds = process.fds.lock();
    let (inode, position) = match (fds.inode(fd), fds.position(fd)) {
        (Some(inode), Some(position)) => (alloc::sync::Arc::clone(inode), position),
        _ => return -1,
    };
    drop(fds);
    match fs.inodes.write_at(&inode, buf, position) {
        Ok(n) => {
            process.fds.lock().set_position(fd, position + n as u32);
            n as i32
        }
        Err(_) => -1,
    }
}

pub fn seek(process: &Process, fd: i32, pos: u32) {
    let _ = process.fds.lock().set_position(fd, pos);
}

pub fn tell(process: &Process, fd: i32) -> i32 {
    process.fds.lock().position(fd).map(|p| p as i32).unwrap_or(-1)
}

/// Changes the working directory, moving the `pwd_count` mark from the
/// old cwd to the new one so neither can be removed while in use.
pub fn chdir(fs: &FileSystem<'_>, process: &Process, path: &Path) -> bool {
    match fs.resolve(&process.cwd.lock(), path) {
        Ok(dir) if dir.is_dir() => {
            dir.inc_pwd_count();
            let old = core::mem::replace(&mut *process.cwd.lock(), dir);
            old.dec_pwd_count();
            true
        }
        _ => false,
    }
}

pub fn mkdir(fs: &FileSystem<'_>, process: &Process, path: &Path) -> bool {
    match fs.create_dir(&process.cwd.lock(), path) {
        Ok(dir) => {
            fs.inodes.close(dir);
            true
        }
        Err(_) => false,
    }
}

pub fn isdir(process: &Process, fd: i32) -> bool {
    process.fds.lock().inode(fd).map(|i| i.is_dir()).unwrap_or(false)
}

pub fn inumber(process: &Process, fd: i32) -> i32 {
    process.fds.lock().inode(fd).map(|i| i.sector() as i32).unwrap_or(-1)
}

/// Reads the next directory entry name at descriptor `fd`'s current
/// position into `name_buf`, returning whether one was found. `.` and
/// `..` are skipped, same as `readdir` in the original filesystem.
pub fn readdir(fs: &FileSystem<'_>, process: &Process, fd: i32, name_buf: &mut [u8]) -> bool {
    let fds = process.fds.lock();
    let inode = match fds.inode(fd) {
        Some(inode) if inode.is_dir() => alloc::sync::Arc::clone(inode),
        _ => return false,
    };
    let position = fds.position(fd).unwrap_or(0);
    drop(fds);

    if let Some((name, _sector)) = crate::fs::dir::entries(&fs.inodes, &inode)
        .into_iter()
        .nth(position as usize)
    {
        process.fds.lock().set_position(fd, position + 1);
        let len = name.iter().position(|b| *b == 0).unwrap_or(name.len());
        let n = len.min(name_buf.len());
        name_buf[..n].copy_from_slice(&name[..n]);
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    extern crate std;

    use alloc::sync::Arc;

    use super::*;
    use crate::block::MemDisk;
    use crate::vm::mmu::MockPageTable;

    #[test]
    fn chdir_moves_the_pwd_count_mark_between_directories() {
        let disk = MemDisk::new(1024);
        let fs = FileSystem::format(&disk);
        let root = fs.root().unwrap();
        let sub = fs.create_dir(&root, Path::from_str("sub")).unwrap();
        fs.inodes.close(sub);

        let process = Process::new(1, Arc::clone(&root), Arc::new(MockPageTable::new()));
        assert_eq!(root.pwd_count(), 1);

        assert!(chdir(&fs, &process, Path::from_str("sub")));
        assert_eq!(root.pwd_count(), 0);
        assert_eq!(process.cwd.lock().pwd_count(), 1);

        // Now in use: removing it must fail until the process moves away.
        assert!(fs.remove(&root, Path::from_str("sub")).is_err());
    }
}
