//! The task/thread module: an external collaborator.
//!
//! Out of scope per spec.md section 1. The file system needs exactly one
//! thing from it: the calling task's current-working-directory sector
//! (spec.md section 3, "Open directory handle" / section 5, "The
//! current-working-directory sector is a per-task scalar"). Everything else
//! named there (current task, task-local open-file table) belongs to the
//! syscall layer, not here.
pub trait TaskContext {
    /// The sector of the directory inode relative paths resolve against.
    fn cwd(&self) -> crate::SectorId;

    /// Updates the calling task's working-directory sector (used by `chdir`).
    fn set_cwd(&self, sector: crate::SectorId);
}
