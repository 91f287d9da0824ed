use slotpage::{FieldType, FileId, PAGE_SIZE, PageError, PageId, Schema, SlottedPage, TupleId, io};

fn main() -> Result<(), PageError> {
    let schema = Schema::new("employee", vec![("id", FieldType::Int), ("age", FieldType::Int)])?;
    let page_id = PageId::new(FileId(1), 100);
    let mut page = SlottedPage::new(page_id, vec![0u8; PAGE_SIZE], &schema)?;

    let first = schema.instantiate([1, 25])?;
    let first_id = page.insert_tuple(&schema.pack(&first)?);
    for i in 0..10 {
        let record = schema.instantiate([i, 2 * i + 20])?;
        page.insert_tuple(&schema.pack(&record)?);
    }
    println!(
        "{} tuples, {} of {} bytes free",
        page.header().num_tuples(),
        page.header().free_space(),
        page.header().page_capacity()
    );

    if let Some(id) = first_id {
        page.put_tuple(id, &schema.pack(&schema.instantiate([1, 28])?)?);
    }
    page.delete_tuple(TupleId::new(page_id, 1));

    io::write(&mut page);
    if let Some(restored) = io::read(page_id)? {
        for (id, bytes) in restored.tuples() {
            println!("slot {:>3}: {}", id.tuple_index(), schema.unpack(bytes)?);
        }
    }
    Ok(())
}
