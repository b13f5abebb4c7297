use pepflow::store::Datafile;
use pepflow::*;
use uuid::Uuid;

/// MGF text with `records` spectra, each closed by `END IONS`.
pub fn mgf_records(records: usize) -> String {
    (0..records)
        .map(|i| {
            format!(
                "BEGIN IONS\nTITLE=spectrum {i}\nPEPMASS={:.4}\nCHARGE=2+\n{}.5 {}.0\nEND IONS\n",
                400.0 + i as f64 * 0.25,
                100 + i,
                10 + i
            )
        })
        .collect()
}

pub fn sample_datafile(uploaded_file_name: &str) -> Datafile {
    Datafile {
        id: Uuid::new_v4(),
        name: "Liver Run 1".to_string(),
        uploaded_file_name: uploaded_file_name.to_string(),
    }
}

/// A valid submission searching `datafile` with `spectra_count` spectra per
/// chunk.
pub fn sample_submission(datafile_id: Uuid, parameter_file_id: Uuid, spectra_count: u32) -> NewJob {
    NewJob {
        name: "Liver Digest".to_string(),
        searcher: Some(SearcherKind::Tandem),
        parameter_file_id: Some(parameter_file_id),
        datafile_id: Some(datafile_id),
        spectra_count: Some(spectra_count),
        priority: Some(10),
    }
}

/// A chunk of `job_id` with the given timestamps; `0.0` means unset.
pub fn timed_chunk(job_id: JobId, index: usize, chunk_count: u32, started: f64, finished: f64) -> Chunk {
    let filename = format!("{job_id}/input-{index:08}.mgf");
    Chunk {
        id: ChunkId::new(),
        job_id,
        chunk_key: ChunkKey::derive(&filename),
        instance_id: (started > 0.0).then(|| "i-test".to_string()),
        filename,
        parameter_filename: "hash/parameters.conf".to_string(),
        bytes: 64,
        chunk_count,
        sent_at: index as f64,
        started_at: started,
        finished_at: finished,
    }
}
